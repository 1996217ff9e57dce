//! # hyke-jobs: Hyke status engine runner
//!
//! Usage:
//!   hyke-jobs run                         # One batch (run from cron)
//!   hyke-jobs run --every 300             # Keep running every 300s
//!   hyke-jobs enqueue --email a@x.com --process "Running flow"
//!   hyke-jobs list --outcome -1           # Pending records
//!   hyke-jobs init                        # Write ~/.hyke/config.toml

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hyke_core::HykeConfig;
use hyke_scheduler::{
    HandlerRegistry, NewRecord, Outcome, ProcessKind, SchedulerEngine, StatusEngineDb,
    spawn_scheduler,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hyke-jobs", version, about = "⏰ Hyke status engine: dispatch scheduled workflow records")]
struct Cli {
    /// Config file (defaults to ~/.hyke/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch every due record once, or repeatedly with --every
    Run {
        /// Repeat the batch every N seconds (0 uses the configured interval)
        #[arg(long, num_args = 0..=1, default_missing_value = "0")]
        every: Option<u64>,
    },
    /// Queue a new status engine record
    Enqueue {
        #[arg(long)]
        email: String,
        #[arg(long)]
        process: String,
        #[arg(long, default_value = "Hyke System")]
        formation: String,
        #[arg(long, default_value = "1")]
        stage: i32,
        #[arg(long)]
        data: Option<String>,
        /// Also create the client's progress status row if missing
        #[arg(long)]
        track_progress: bool,
    },
    /// Show the most recent records
    List {
        /// Only records with this outcome code (e.g. -1 scheduled, 1 completed)
        #[arg(long, allow_hyphen_values = true)]
        outcome: Option<i32>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<HykeConfig> {
    let config = match path {
        Some(path) => HykeConfig::load_from(path)?,
        None => HykeConfig::load()?,
    };
    Ok(config)
}

fn open_db(config: &HykeConfig) -> Result<Arc<StatusEngineDb>> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db = StatusEngineDb::open(&db_path)?;
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "hyke_jobs=debug,hyke_scheduler=debug,hyke_channels=debug,hyke_core=debug"
    } else {
        "hyke_jobs=info,hyke_scheduler=info,hyke_channels=info,hyke_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    match cli.command {
        Command::Init { force } => {
            let path = cli.config.unwrap_or_else(HykeConfig::default_path);
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            HykeConfig::default().save_to(&path)?;
            println!("✅ Config written to {}", path.display());
        }

        Command::Run { every } => {
            let config = load_config(cli.config.as_ref())?;
            let db = open_db(&config)?;
            let services = hyke_channels::services_from_config(&config, db.clone())?;
            let interval = match every {
                Some(0) => Some(config.scheduler.check_interval_secs),
                other => other,
            };
            let engine = SchedulerEngine::new(db, HandlerRegistry::standard(), services, config.scheduler);

            match interval {
                None => {
                    let report = engine.run_once().await?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                Some(secs) => {
                    let engine = Arc::new(engine);
                    tokio::select! {
                        _ = spawn_scheduler(engine, secs) => {}
                        _ = tokio::signal::ctrl_c() => {
                            tracing::info!("🛑 Shutting down scheduler");
                        }
                    }
                }
            }
        }

        Command::Enqueue {
            email,
            process,
            formation,
            stage,
            data,
            track_progress,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let db = open_db(&config)?;
            if ProcessKind::from_process_name(&process).is_none() {
                tracing::warn!("⚠️ No handler for process '{process}', the record will never be dispatched");
            }
            if track_progress {
                db.ensure_progress(&email)?;
            }
            let record = NewRecord::scheduled(&email, &process, &formation)
                .with_stage(stage)
                .with_optional_data(data);
            let id = db.insert_record(&record)?;
            println!("📅 Queued record {id}: {email} - {process}");
        }

        Command::List { outcome, limit } => {
            let config = load_config(cli.config.as_ref())?;
            let db = open_db(&config)?;
            let outcome = match outcome {
                Some(code) => Some(
                    Outcome::from_code(code).with_context(|| format!("unknown outcome code {code}"))?,
                ),
                None => None,
            };
            for record in db.recent_records(outcome, limit)? {
                println!(
                    "{record} [stage {}] {} ({})",
                    record.process_stage,
                    record.outcome,
                    record.data_or_empty()
                );
            }
        }
    }

    Ok(())
}
