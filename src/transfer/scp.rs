use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::TransferStrategy;
use crate::config::SshConfig;
use crate::error::{Error, Result};

/// Copies files with `scp` from a device that exposes a root shell over SSH.
#[derive(Debug, Clone)]
pub struct SecureCopy {
    program: String,
    user: String,
    host: String,
    port: Option<u16>,
}

impl SecureCopy {
    pub fn new(user: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        SecureCopy {
            program: "scp".to_string(),
            user: user.into(),
            host: host.into(),
            port,
        }
    }

    /// The configured host wins; otherwise the device id is used as the
    /// address (USB-tunnelled devices are reachable by their identifier).
    pub fn for_device(config: &SshConfig, device_id: &str) -> Self {
        let host = config.host.clone().unwrap_or_else(|| device_id.to_string());
        SecureCopy::new(config.user.clone(), host, config.port)
    }

    /// Substitute the copy program.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, remote: &str, local: &Path) -> Vec<String> {
        let mut args = vec!["-q".to_string()];
        if let Some(port) = self.port {
            args.push("-P".to_string());
            args.push(port.to_string());
        }
        args.push(format!("{}@{}:{}", self.user, self.host, remote));
        args.push(local.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl TransferStrategy for SecureCopy {
    fn name(&self) -> &'static str {
        "secure-copy"
    }

    async fn fetch(&self, remote: &str, local: &Path) -> Result<()> {
        let output = Command::new(&self.program)
            .args(self.args(remote, local))
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(local).await;
            return Err(Error::ExternalTool {
                tool: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if !tokio::fs::try_exists(local).await? {
            return Err(Error::ExternalTool {
                tool: self.program.clone(),
                code: output.status.code(),
                stderr: format!("no file produced at {}", local.display()),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_scp_arguments() {
        let scp = SecureCopy::new("root", "10.0.0.5", Some(2222));
        assert_eq!(
            scp.args("/tmp/a.zip", Path::new("/snap/files.zip")),
            vec!["-q", "-P", "2222", "root@10.0.0.5:/tmp/a.zip", "/snap/files.zip"]
        );

        let scp = SecureCopy::new("mobile", "iphone", None);
        assert_eq!(scp.args("/x", Path::new("y"))[1], "mobile@iphone:/x");
    }

    #[test]
    fn host_falls_back_to_device_id() {
        let config = SshConfig {
            user: "root".to_string(),
            host: None,
            port: None,
        };
        let scp = SecureCopy::for_device(&config, "00008030-001A");
        assert_eq!(scp.host, "00008030-001A");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_copy_is_an_external_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let scp = SecureCopy::new("root", "host", None).with_program("false");

        let err = scp.fetch("/remote", &dir.path().join("a.zip")).await.unwrap_err();
        assert!(matches!(err, Error::ExternalTool { code: Some(1), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_success_without_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let scp = SecureCopy::new("root", "host", None).with_program("true");

        let err = scp.fetch("/remote", &dir.path().join("a.zip")).await.unwrap_err();
        assert!(matches!(err, Error::ExternalTool { code: Some(0), .. }));
    }
}
