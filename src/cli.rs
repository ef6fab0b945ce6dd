use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DiffTool;
use crate::store::OutputFormat;

#[derive(Parser)]
#[command(name = "mobile-diff")]
#[command(about = "Snapshot a mobile app's on-device state and diff two snapshots")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Snapshot storage root (overrides config and MOBILE_DIFF_HOME)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Use the directory-backed devices from the config file instead of the bridge helper
    #[arg(long, default_value_t = false, global = true)]
    pub local: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List connected devices and their detected platform
    Devices,

    /// Create, inspect, compare and delete snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
}

#[derive(Subcommand)]
pub enum SnapshotCommand {
    /// Capture a new snapshot of an app
    Create(CreateArgs),

    /// List snapshots of an app
    List(ListArgs),

    /// Print a snapshot's metadata
    Show(ShowArgs),

    /// Compare two snapshots of an app
    Diff(DiffArgs),

    /// Delete a snapshot
    Delete(ShowArgs),
}

#[derive(Args)]
pub struct AppArgs {
    /// Device identifier
    pub device: String,

    /// Bundle identifier (iOS) or package name (Android)
    pub bundle: String,
}

#[derive(Args)]
pub struct CreateArgs {
    #[command(flatten)]
    pub app: AppArgs,

    /// Snapshot label, unique per device and app
    #[arg(long, short = 'l')]
    pub label: String,

    /// Scopes to capture (defaults depend on the platform)
    #[arg(long, short = 's', value_delimiter = ',')]
    pub scopes: Option<Vec<String>>,

    /// App data encoding
    #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Transfer archives with scp (device must expose a root SSH shell)
    #[arg(long, default_value_t = false)]
    pub ssh: bool,
}

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub app: AppArgs,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub app: AppArgs,

    /// Snapshot label
    pub label: String,
}

#[derive(Args)]
pub struct DiffArgs {
    #[command(flatten)]
    pub app: AppArgs,

    /// Label of the earlier snapshot
    pub before: String,

    /// Label of the later snapshot
    pub after: String,

    /// External tool for textual tree diffs
    #[arg(long, short = 't', value_enum)]
    pub tool: Option<DiffTool>,

    /// Disable colored tool output
    #[arg(long, default_value_t = false)]
    pub no_color: bool,

    /// Lines of context in tool output
    #[arg(long, short = 'u')]
    pub unified: Option<u32>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_create_with_scopes() {
        let cli = Cli::parse_from([
            "mobile-diff", "snapshot", "create", "emulator-5554", "com.example.app",
            "--label", "before", "--scopes", "files,cache", "--format", "yaml", "--ssh",
        ]);
        let Command::Snapshot(SnapshotCommand::Create(args)) = cli.command else {
            panic!("expected snapshot create");
        };
        assert_eq!(args.app.bundle, "com.example.app");
        assert_eq!(args.scopes, Some(vec!["files".to_string(), "cache".to_string()]));
        assert_eq!(args.format, OutputFormat::Yaml);
        assert!(args.ssh);
    }

    #[test]
    fn parses_diff_overrides_and_global_flags() {
        let cli = Cli::parse_from([
            "mobile-diff", "-vv", "snapshot", "diff", "d", "b", "one", "two",
            "--tool", "git", "--no-color", "--unified", "5", "--root", "/tmp/snaps",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/snaps")));
        let Command::Snapshot(SnapshotCommand::Diff(args)) = cli.command else {
            panic!("expected snapshot diff");
        };
        assert_eq!(args.tool, Some(DiffTool::Git));
        assert_eq!(args.unified, Some(5));
        assert!(args.no_color);
    }
}
