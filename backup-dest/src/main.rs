//! backup-dest - operator CLI for backup destination resolution.

use anyhow::Result;
use backup_dest::{
    config::Config, utils, BackupRequest, DefaultStorageFactory, DestinationResolver, FixedVersion,
    Username,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// User to open storage as (overrides config)
    #[arg(short, long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve where a backup would be written
    Resolve {
        /// Collection or destination URIs, locality tagged when partitioned
        #[arg(required = true)]
        uris: Vec<String>,

        /// Subdirectory inside the collection, or LATEST
        #[arg(long, conflicts_with = "legacy")]
        subdir: Option<String>,

        /// Plan a BACKUP TO into the URIs themselves
        #[arg(long)]
        legacy: bool,

        /// Alternative location for incremental layers (repeatable)
        #[arg(long = "incremental-location")]
        incremental_location: Vec<String>,

        /// Explicit prior chain, base backup first (repeatable)
        #[arg(long = "incremental-from")]
        incremental_from: Vec<String>,

        /// Backup end time (RFC 3339), defaults to now
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },

    /// Read or write the LATEST pointer of a collection
    Latest {
        #[command(subcommand)]
        action: LatestCommand,
    },

    /// List the full backups of a collection
    ListFull { collection: String },
}

#[derive(Subcommand, Debug)]
enum LatestCommand {
    /// Print the subdirectory of the newest backup
    Read { collection: String },
    /// Record a subdirectory as the newest backup
    Write { collection: String, suffix: String },
}

#[derive(Serialize)]
struct LatestOutput<'a> {
    collection: &'a str,
    suffix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    config.apply_env()?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting backup-dest v{} (cluster_version: {})",
        env!("CARGO_PKG_VERSION"),
        config.resolver.cluster_version
    );

    let resolver = DestinationResolver::new(
        Arc::new(DefaultStorageFactory::new(&config.storage.local_root)),
        Arc::new(FixedVersion(config.resolver.cluster_version)),
        config.resolver.settings(),
    );
    let user = Username::new(args.user.clone().unwrap_or_else(|| config.resolver.user.clone()));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, cancelling");
            on_signal.cancel();
        }
    });

    match args.command {
        Command::Resolve {
            uris,
            subdir,
            legacy,
            incremental_location,
            incremental_from,
            as_of,
        } => {
            let as_of = as_of.unwrap_or_else(Utc::now);
            let request = match subdir {
                _ if legacy => BackupRequest::legacy(uris, as_of),
                Some(subdir) => BackupRequest::into_subdir(uris, subdir, as_of),
                None => BackupRequest::into_collection(uris, as_of),
            }
            .with_incremental_storage(incremental_location)
            .with_incremental_from(incremental_from);

            let resolved = resolver.resolve(&user, &request, &cancel).await?;
            print_json(&resolved)?;
        }
        Command::Latest {
            action: LatestCommand::Read { collection },
        } => {
            let suffix = resolver.read_latest(&user, &collection, &cancel).await?;
            print_json(&LatestOutput {
                collection: &collection,
                suffix: &suffix,
                path: None,
            })?;
        }
        Command::Latest {
            action: LatestCommand::Write { collection, suffix },
        } => {
            let path = resolver.write_latest(&user, &collection, &suffix, &cancel).await?;
            print_json(&LatestOutput {
                collection: &collection,
                suffix: &suffix,
                path: Some(path),
            })?;
        }
        Command::ListFull { collection } => {
            let found = resolver.list_full_backups(&user, &collection, &cancel).await?;
            print_json(&found)?;
        }
    }

    Ok(())
}
