use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mobile_diff::bridge::{self, local::LocalBridge, process::ProcessBridge, Bridge};
use mobile_diff::cli::{Cli, Command, CreateArgs, DiffArgs, SnapshotCommand};
use mobile_diff::config::Config;
use mobile_diff::diff::{self, ToolOptions};
use mobile_diff::progress::ProgressRegistry;
use mobile_diff::report;
use mobile_diff::snapshot::{self, SnapshotRequest};
use mobile_diff::store::SnapshotStore;
use mobile_diff::Error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays clean for `--json`.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(root) = &cli.root {
        config.storage_root = root.clone();
    }
    tracing::debug!(root = %config.storage_root.display(), "using storage root");

    let store = SnapshotStore::new(&config.storage_root);
    let bridge = make_bridge(&config, cli.local);

    match cli.command {
        Command::Devices => {
            let devices = bridge::list_devices(bridge.as_ref())
                .await
                .context("failed to enumerate devices")?;
            print!("{}", report::table::render_devices(&devices));
        }
        Command::Snapshot(SnapshotCommand::Create(args)) => {
            create(bridge, &store, &config, args, cli.verbose > 0).await?;
        }
        Command::Snapshot(SnapshotCommand::List(args)) => {
            let snapshots = store.list(&args.app.device, &args.app.bundle)?;
            if args.json {
                println!("{}", report::json::render(&snapshots)?);
            } else {
                print!("{}", report::table::render_snapshots(&snapshots));
            }
        }
        Command::Snapshot(SnapshotCommand::Show(args)) => {
            let metadata = store.load(&args.app.device, &args.app.bundle, &args.label)?;
            println!("{}", report::json::render(&metadata)?);
        }
        Command::Snapshot(SnapshotCommand::Diff(args)) => {
            compare(&store, &config, args).await?;
        }
        Command::Snapshot(SnapshotCommand::Delete(args)) => {
            let (device, bundle, label) = (&args.app.device, &args.app.bundle, &args.label);
            if !store.exists(device, bundle, label) {
                return Err(Error::NotFound { label: label.clone() }.into());
            }
            store
                .delete(device, bundle, label)
                .with_context(|| format!("failed to delete snapshot \"{label}\""))?;
            println!("Deleted snapshot \"{label}\"");
        }
    }

    Ok(())
}

fn make_bridge(config: &Config, local: bool) -> Arc<dyn Bridge> {
    if local {
        Arc::new(LocalBridge::new(config.local_devices.clone()))
    } else {
        Arc::new(ProcessBridge::new(config.bridge_command.clone()))
    }
}

async fn create(
    bridge: Arc<dyn Bridge>,
    store: &SnapshotStore,
    config: &Config,
    args: CreateArgs,
    verbose: bool,
) -> Result<()> {
    let request = SnapshotRequest {
        device: args.app.device,
        bundle: args.app.bundle,
        label: args.label,
        scopes: args.scopes,
        format: args.format,
        force_ssh: args.ssh,
    };

    let progress = ProgressRegistry::new();
    let (_, mut events) = progress.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            eprintln!("{}", report::progress_line(&event));
        }
    });

    let outcome = snapshot::create_snapshot(bridge, store, config, &request, &progress).await;
    progress.shutdown();
    let _ = printer.await;

    let outcome = outcome.with_context(|| format!("failed to create snapshot \"{}\"", request.label))?;
    print!("{}", report::render_outcome(&outcome, verbose));
    Ok(())
}

async fn compare(store: &SnapshotStore, config: &Config, args: DiffArgs) -> Result<()> {
    let mut options = ToolOptions::from(&config.diff);
    if let Some(tool) = args.tool {
        options.tool = tool;
    }
    if let Some(unified) = args.unified {
        options.unified = unified;
    }
    if args.no_color {
        options.color = false;
    }

    let result = diff::diff_snapshots(
        store,
        &args.app.device,
        &args.app.bundle,
        &args.before,
        &args.after,
        &options,
    )
    .await
    .with_context(|| format!("failed to diff \"{}\" and \"{}\"", args.before, args.after))?;

    if args.json {
        println!("{}", report::json::render(&result)?);
    } else {
        print!("{}", report::diff::render(&result));
    }
    Ok(())
}
