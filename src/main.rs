//! Obsidian S3 Backup - Main entry point
//!
//! Thin wrapper around the executor: argument parsing, configuration
//! loading, logging setup, and exit-status mapping.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use obsidian_s3_backup::config::{Config, Overrides};
use obsidian_s3_backup::{executor, utils};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Vault directory to back up (overrides OBSIDIAN_VAULT_PATH)
    #[arg(long, value_name = "DIR")]
    vault: Option<PathBuf>,

    /// Destination S3 bucket (overrides AWS_S3_BUCKET_NAME)
    #[arg(long)]
    bucket: Option<String>,

    /// AWS region (overrides AWS_REGION)
    #[arg(long)]
    region: Option<String>,

    /// Object key prefix (overrides BACKUP_PREFIX)
    #[arg(long)]
    prefix: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Include dotfiles in the backup
    #[arg(long)]
    include_hidden: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // The logger reads its level from the resolved configuration, so the
    // config has to exist before any tracing output.
    let config = match Config::resolve(Overrides {
        vault_path: args.vault,
        bucket_name: args.bucket,
        region: args.region,
        backup_prefix: args.prefix,
        log_level: args.log_level,
        include_hidden: args.include_hidden,
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = utils::logger::init(&config.log_level) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!("obsidian-s3-backup v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        tracing::error!("configuration error: {e}");
        return ExitCode::FAILURE;
    }

    // An interrupt wins the race, drops the run future and with it the
    // temporary archive.
    let result = tokio::select! {
        result = executor::run(&config) => result,
        () = utils::shutdown::wait_for_signal() => {
            tracing::warn!("backup run interrupted before completion");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(outcome) => {
            tracing::info!("backup succeeded: {}", outcome.object_key);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("backup failed: {e}");
            let mut cause = std::error::Error::source(&e);
            while let Some(c) = cause {
                tracing::error!("  caused by: {c}");
                cause = c.source();
            }
            ExitCode::FAILURE
        }
    }
}
