//! Thin CLI harness for locally exercising the core library — wiring
//! only, kept separate from the logic living in `lib.rs`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use missioncore::config::ConfigManager;
use missioncore::event::EventStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workspace root containing `missioncore.toml` and `.missioncore/`.
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Write a default `missioncore.toml` if one doesn't already exist.
    InitConfig,
    /// Print every event recorded for a task, in append order.
    Replay {
        task_id: String,
    },
    /// Classify a shell command against the configured policy.
    CheckCommand {
        command: String,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut manager = ConfigManager::load_or_init(&args.workspace).context("loading configuration")?;
    manager.apply_env_overrides();

    match args.command {
        CliCommand::InitConfig => {
            info!(path = %manager.config_path().display(), "configuration ready");
        }
        CliCommand::Replay { task_id } => {
            let store = EventStore::open(args.workspace.join(".missioncore").join("events.jsonl"))
                .context("opening event store")?;
            let events = store.read_all().context("reading events")?;
            for event in events.into_iter().filter(|e| e.task_id == task_id) {
                println!(
                    "{}\t{}\t{}/{}\t{}",
                    event.timestamp,
                    event.event_type.as_str(),
                    event.mode,
                    event.stage,
                    event.event_id
                );
            }
        }
        CliCommand::CheckCommand { command } => {
            let policy = manager.command_policy().context("resolving command policy")?;
            let kind = policy.classify_command_kind(&command);
            let safe = policy.is_command_safe(&command);
            println!("safe={safe} kind={kind:?}");
        }
    }

    Ok(())
}
