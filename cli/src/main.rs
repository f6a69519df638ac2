//! HealthSim command-line front end.
//!
//! Batch commands over the cohort store: list and inspect cohorts,
//! adjudicate them, export them in any registered wire format, and build new
//! cohorts from a generation service or a drafts file.

mod commands;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use healthsim_config::{HealthsimConfig, default_data_dir};
use healthsim_types::{AppealOutcome, CohortName, CohortNameError};

use crate::commands::App;

#[derive(Parser)]
#[command(name = "healthsim", version)]
#[command(about = "Synthetic healthcare cohorts: adjudication and wire-format exports")]
struct Cli {
    /// Directory holding the cohort database; overrides `[storage] data_dir`
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered output formats
    Formats,
    /// Inspect and manage saved cohorts
    Cohorts {
        #[command(subcommand)]
        command: CohortCommand,
    },
    /// Serialize a saved cohort in one or more formats
    Export {
        #[arg(value_parser = cohort_name)]
        cohort: CohortName,
        /// Registry names, e.g. fhir-r4 x12-837p
        #[arg(required = true)]
        formats: Vec<String>,
        /// Write files into this directory instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Replace existing files in the output directory
        #[arg(long)]
        force: bool,
    },
    /// Adjudicate submitted claims and pending fills
    Adjudicate {
        #[arg(value_parser = cohort_name)]
        cohort: CohortName,
        /// Adjudication date (defaults to today)
        #[arg(long)]
        on: Option<NaiveDate>,
        /// Write outcomes back to the cohort
        #[arg(long)]
        save: bool,
    },
    /// File or resolve a claim appeal
    Appeal {
        #[command(subcommand)]
        command: AppealCommand,
    },
    /// Request drafts from the configured generation service and save them
    Generate {
        /// JSON generation request
        #[arg(long)]
        request: PathBuf,
        #[arg(long, value_parser = cohort_name)]
        save: CohortName,
        #[arg(long)]
        overwrite: bool,
        /// Retries for unavailable or rate-limited responses
        #[arg(long, default_value_t = 2)]
        retries: u32,
    },
    /// Validate drafts from a JSON file and save them as a cohort
    Ingest {
        #[arg(long)]
        drafts: PathBuf,
        #[arg(long, value_parser = cohort_name)]
        save: CohortName,
        #[arg(long)]
        overwrite: bool,
    },
}

#[derive(Subcommand)]
enum CohortCommand {
    List,
    /// Metadata and entity counts
    Show {
        #[arg(value_parser = cohort_name)]
        name: CohortName,
    },
    Delete {
        #[arg(value_parser = cohort_name)]
        name: CohortName,
    },
    /// Run a read-only SELECT against the cohort store
    Query { sql: String },
}

#[derive(Subcommand)]
enum AppealCommand {
    File {
        #[arg(value_parser = cohort_name)]
        cohort: CohortName,
        claim: String,
        #[arg(long)]
        on: Option<NaiveDate>,
    },
    Resolve {
        #[arg(value_parser = cohort_name)]
        cohort: CohortName,
        claim: String,
        outcome: Outcome,
        #[arg(long)]
        on: Option<NaiveDate>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Outcome {
    Overturned,
    Upheld,
}

impl From<Outcome> for AppealOutcome {
    fn from(value: Outcome) -> Self {
        match value {
            Outcome::Overturned => AppealOutcome::Overturned,
            Outcome::Upheld => AppealOutcome::Upheld,
        }
    }
}

fn cohort_name(raw: &str) -> Result<CohortName, CohortNameError> {
    CohortName::new(raw)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout carries export bytes; no log file means no logs.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.healthsim/logs/healthsim.log
    if let Some(dir) = default_data_dir() {
        candidates.push(dir.join("logs").join("healthsim.log"));
    }

    // Fallback: ./.healthsim/logs/healthsim.log
    candidates.push(PathBuf::from(".healthsim").join("logs").join("healthsim.log"));

    candidates
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = HealthsimConfig::load()?.unwrap_or_default();
    let app = App::new(config, cli.data_dir);
    let today = Utc::now().date_naive();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Formats => app.formats(&mut out)?,
        Commands::Cohorts { command } => match command {
            CohortCommand::List => app.list_cohorts(&mut out)?,
            CohortCommand::Show { name } => app.show_cohort(&name, &mut out)?,
            CohortCommand::Delete { name } => app.delete_cohort(&name, &mut out)?,
            CohortCommand::Query { sql } => app.query(&sql, &mut out)?,
        },
        Commands::Export {
            cohort,
            formats,
            output,
            force,
        } => {
            let cancel = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&cancel);
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted; no further exports will start");
                    flag.store(true, Ordering::SeqCst);
                }
            });
            app.export(&cohort, &formats, output.as_deref(), force, cancel, &mut out)
                .await?;
        }
        Commands::Adjudicate { cohort, on, save } => {
            app.adjudicate(&cohort, on.unwrap_or(today), save, &mut out)?;
        }
        Commands::Appeal { command } => match command {
            AppealCommand::File { cohort, claim, on } => {
                app.file_appeal(&cohort, &claim, on.unwrap_or(today), &mut out)?;
            }
            AppealCommand::Resolve {
                cohort,
                claim,
                outcome,
                on,
            } => {
                app.resolve_appeal(
                    &cohort,
                    &claim,
                    outcome.into(),
                    on.unwrap_or(today),
                    &mut out,
                )?;
            }
        },
        Commands::Generate {
            request,
            save,
            overwrite,
            retries,
        } => {
            app.generate(&request, &save, overwrite, retries, &mut out)
                .await?;
        }
        Commands::Ingest {
            drafts,
            save,
            overwrite,
        } => app.ingest(&drafts, &save, overwrite, &mut out)?,
    }

    out.flush()?;
    Ok(())
}
