// src/main.rs

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use model_downloader::prelude::*;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_STATE_DB: &str = "downloads.db";

#[derive(Parser)]
#[command(name = "model-dl", version, about = "Resumable downloader for local model files")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Primary source URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Fallback mirror URL
    #[arg(long, global = true)]
    mirror_url: Option<String>,

    /// Destination file
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,

    /// SQLite file holding a paused download
    #[arg(long, global = true)]
    state_db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check free space for the configured model
    Check,
    /// Download the model; Ctrl-C pauses
    Download {
        /// Start from the mirror instead of the primary URL
        #[arg(long)]
        mirror: bool,
        /// Answer yes to every prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Continue a paused download
    Resume,
    /// Drop a paused download and its partial file
    Cancel,
}

/// Asks on the terminal.
struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        print!("{}: {} [y/N] ", title, message);
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(e) => {
                warn!("failed to read answer: {}", e);
                false
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<DownloaderConfig> {
    let mut config = match &cli.config {
        Some(path) => DownloaderConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DownloaderConfig::default(),
    };
    if let Some(url) = &cli.url {
        config.primary_url = url.clone();
    }
    if let Some(mirror) = &cli.mirror_url {
        config.mirror_url = Some(mirror.clone());
    }
    if let Some(output) = &cli.output {
        config.destination = output.clone();
    }
    if let Some(db) = &cli.state_db {
        config.state_db = Some(db.clone());
    }
    config.validate()?;
    Ok(config)
}

fn progress_printer() -> ProgressCallback {
    Arc::new(|update: ProgressUpdate| {
        let total = update
            .bytes_expected
            .map(format_bytes)
            .unwrap_or_else(|| "?".to_string());
        eprint!(
            "\r{:>5.1}%  {} / {}  {}      ",
            update.fraction * 100.0,
            format_bytes(update.bytes_written),
            total,
            format_speed(update.speed)
        );
    })
}

/// Runs a transfer; Ctrl-C pauses it and waits for it to wind down.
async fn run_interruptible<F>(manager: &DownloadManager, transfer: F) -> DownloadOutcome
where
    F: Future<Output = DownloadOutcome>,
{
    tokio::pin!(transfer);
    tokio::select! {
        outcome = &mut transfer => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            info!("pausing; run `model-dl resume` to continue");
            let (paused, outcome) = tokio::join!(manager.pause(), &mut transfer);
            if let Some(error) = paused.error {
                warn!("pause failed: {}", error);
            }
            outcome
        }
    }
}

fn report(outcome: DownloadOutcome) -> Result<()> {
    eprintln!();
    if outcome.paused {
        println!("Download paused.");
        return Ok(());
    }
    if outcome.cancelled {
        println!("Download cancelled.");
        return Ok(());
    }
    if outcome.success {
        if let Some(path) = outcome.path {
            println!("Model downloaded and verified: {}", path.display());
        }
        return Ok(());
    }
    bail!(outcome.error.unwrap_or_else(|| "download failed".to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = load_config(&cli)?;
    let state_db = config
        .state_db
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DB));
    let store = SessionStore::open(&state_db)
        .await
        .with_context(|| format!("opening {}", state_db.display()))?;

    let confirm: Arc<dyn Confirm> = match &cli.command {
        Command::Download { yes: true, .. } => Arc::new(AutoConfirm(true)),
        _ => Arc::new(StdinConfirm),
    };
    let manager = DownloadManager::http(config, confirm)?.with_store(store);

    match cli.command {
        Command::Check => {
            let storage = manager.check_storage_space().await;
            println!(
                "required {}, available {}",
                format_bytes(storage.required_bytes),
                format_bytes(storage.available_bytes)
            );
            if !storage.has_space {
                bail!("not enough free space");
            }
        }
        Command::Download { mirror, .. } => {
            if manager.restore().await? {
                bail!("a paused download exists; run `model-dl resume` or `model-dl cancel`");
            }
            let storage = manager.check_storage_space().await;
            info!(
                "downloading {} ({} free)",
                format_bytes(manager.config().expected_size),
                format_bytes(storage.available_bytes)
            );
            let outcome = run_interruptible(&manager, manager.download(progress_printer(), mirror)).await;
            report(outcome)?;
        }
        Command::Resume => {
            if !manager.restore().await? {
                println!("No paused download.");
                return Ok(());
            }
            let outcome = run_interruptible(&manager, manager.resume(progress_printer())).await;
            report(outcome)?;
        }
        Command::Cancel => {
            manager.restore().await?;
            let outcome = manager.cancel().await;
            if outcome.success {
                println!("Download cancelled.");
            } else {
                report(outcome)?;
            }
        }
    }
    Ok(())
}
