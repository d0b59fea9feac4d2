use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use logixwatch::config::{UploadConfig, WatchConfig};
use logixwatch::driver::HelperDriver;
use logixwatch::exec::preflight_command;
use logixwatch::lock::LockError;
use logixwatch::orchestrator::CycleOrchestrator;
use logixwatch::upload::{run_upload, UploadOptions};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "logixwatch")]
#[command(about = "Stability watcher and single-flight backup uploader for Logix controllers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the audit tag and run the backup job once it has been stable
    Watch {
        /// Path to the watch config file
        #[arg(short, long, default_value = "watch.toml")]
        config: PathBuf,

        /// Override the backup project directory from the config
        #[arg(long)]
        project_dir: Option<PathBuf>,

        /// Override the project filename prefix from the config
        #[arg(long)]
        prefix: Option<String>,

        /// Override the monitored tag name from the config
        #[arg(long)]
        tag: Option<String>,
    },

    /// Upload the controller's project and save a timestamped local backup.
    /// Queues behind any other running upload; exits non-zero on timeout.
    Upload {
        /// Communication path to the controller
        comm_path: String,

        /// Directory to save the final .ACD file (created if absent)
        #[arg(long, default_value = ".")]
        save_dir: PathBuf,

        /// Optional prefix for the saved filename (e.g. 'Backup_')
        #[arg(long, default_value = "")]
        prefix: String,

        /// Path to the config file providing the SDK helper command and
        /// lock settings
        #[arg(short, long, default_value = "watch.toml")]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Watch {
            config,
            project_dir,
            prefix,
            tag,
        } => watch(config, project_dir, prefix, tag),
        Commands::Upload {
            comm_path,
            save_dir,
            prefix,
            config,
        } => upload(comm_path, save_dir, prefix, config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn watch(
    config_path: PathBuf,
    project_dir: Option<PathBuf>,
    prefix: Option<String>,
    tag: Option<String>,
) -> Result<()> {
    let mut config = WatchConfig::load(&config_path)?;
    if let Some(dir) = project_dir {
        config.project_dir = dir;
    }
    if let Some(prefix) = prefix {
        config.file_prefix = Some(prefix);
    }
    if let Some(tag) = tag {
        config.tag = tag;
    }

    preflight_command(&config.external_command, "external backup")?;
    preflight_command(&config.helper_command, "SDK helper")?;

    let driver = HelperDriver::new(config.helper_command.clone())
        .map_err(|e| anyhow::anyhow!(e).context("invalid SDK helper configuration"))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        eprintln!("\nshutting down...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    let mut orchestrator = CycleOrchestrator::new(config, Box::new(driver));
    orchestrator.run(&shutdown)
}

fn upload(comm_path: String, save_dir: PathBuf, prefix: String, config_path: PathBuf) -> Result<()> {
    let config = if config_path.exists() {
        UploadConfig::load(&config_path)?
    } else {
        UploadConfig::default()
    };

    preflight_command(&config.helper_command, "SDK helper")?;
    let driver = HelperDriver::new(config.helper_command.clone())
        .map_err(|e| anyhow::anyhow!(e).context("invalid SDK helper configuration"))?;

    let options = UploadOptions {
        comm_path,
        save_dir,
        prefix,
        lock: config.lock,
    };

    match run_upload(&driver, &options) {
        Ok(path) => {
            println!("{} {}", "saved".green().bold(), path.display());
            Ok(())
        }
        Err(e) => {
            if e.downcast_ref::<LockError>()
                .is_some_and(|l| matches!(l, LockError::Timeout { .. }))
            {
                bail!("gave up waiting for another backup to finish: {e}");
            }
            Err(e)
        }
    }
}
