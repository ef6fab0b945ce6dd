//! External diff tools, used only for their textual output.
//!
//! Both tools exit 0 when the trees match and 1 when they differ. Any other
//! outcome is a failure.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::DiffTool;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct ToolOptions {
    pub tool: DiffTool,
    pub unified: u32,
    pub color: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub differences: bool,
    pub text: String,
}

/// Program and arguments for `tool`, or `None` when textual output is off.
pub fn command_line(options: &ToolOptions, before: &Path, after: &Path) -> Option<(&'static str, Vec<String>)> {
    let before = before.to_string_lossy().into_owned();
    let after = after.to_string_lossy().into_owned();
    let color = options.color.then(|| "--color=always".to_string());

    match options.tool {
        DiffTool::None => None,
        DiffTool::Diff => {
            let mut args = vec!["-r".to_string(), format!("-U{}", options.unified)];
            args.extend(color);
            args.extend([before, after]);
            Some(("diff", args))
        }
        DiffTool::Git => {
            let mut args = vec!["diff".to_string(), "--no-index".to_string()];
            args.extend(color);
            args.push(format!("-U{}", options.unified));
            args.extend([before, after]);
            Some(("git", args))
        }
    }
}

pub async fn run_tool(options: &ToolOptions, before: &Path, after: &Path) -> Result<Option<ToolOutput>> {
    let Some((program, args)) = command_line(options, before, after) else {
        return Ok(None);
    };
    run(program, &args).await.map(Some)
}

async fn run(program: &str, args: &[String]) -> Result<ToolOutput> {
    tracing::debug!(program, ?args, "running diff tool");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;

    let text = String::from_utf8_lossy(&output.stdout).into_owned();
    match output.status.code() {
        Some(0) => Ok(ToolOutput { differences: false, text }),
        Some(1) => Ok(ToolOutput { differences: true, text }),
        code => Err(Error::ExternalTool {
            tool: program.to_string(),
            code,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
    }
}
