use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rdt_core::AlertSummary;
use rdt_engine::{Pipeline, PipelineConfig, PipelineError, RunRequest};
use rdt_notify::{
    ContactDirectory, FileOutboxDispatcher, LogDispatcher, NotificationDispatcher,
};

#[derive(Debug, Parser)]
#[command(name = "rdt-cli")]
#[command(about = "Retail display tracker command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile one week's raw snapshot against the prior report and
    /// write the artifacts.
    Process {
        /// Raw observation CSV (long form).
        #[arg(long)]
        raw: PathBuf,
        /// Prior cumulative report CSV (wide form).
        #[arg(long)]
        prior: PathBuf,
        /// Week number used in artifact names.
        #[arg(long)]
        week: u32,
        /// Overrides RDT_REPORTS_DIR.
        #[arg(long)]
        reports_dir: Option<PathBuf>,
        /// Store contacts CSV; overrides RDT_CONTACTS_FILE.
        #[arg(long)]
        contacts: Option<PathBuf>,
    },
    /// Render and deliver alerts from an existing week's summary.
    Notify {
        #[arg(long)]
        week: u32,
        /// Directory holding that week's artifacts.
        #[arg(long)]
        reports_dir: Option<PathBuf>,
        /// Write messages here instead of logging them.
        #[arg(long)]
        outbox: Option<PathBuf>,
        /// Resend to a single recipient only.
        #[arg(long)]
        recipient: Option<String>,
        /// Also send the management rollup to this address.
        #[arg(long)]
        rollup_to: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Process {
            raw,
            prior,
            week,
            reports_dir,
            contacts,
        } => process(raw, prior, week, reports_dir, contacts),
        Commands::Notify {
            week,
            reports_dir,
            outbox,
            recipient,
            rollup_to,
        } => notify(week, reports_dir, outbox, recipient, rollup_to),
    }
}

fn process(
    raw: PathBuf,
    prior: PathBuf,
    week: u32,
    reports_dir: Option<PathBuf>,
    contacts: Option<PathBuf>,
) -> Result<()> {
    let mut config = PipelineConfig::from_env();
    if let Some(dir) = reports_dir {
        config.reports_dir = dir;
    }
    let directory = load_contacts(contacts)?;
    let pipeline = Pipeline::new(config, Arc::new(directory));

    let request = RunRequest {
        raw_path: raw,
        prior_path: prior,
        week,
    };
    match pipeline.run_once(&request) {
        Ok(run) => {
            println!(
                "week {} processed: stores={} changes={} increased={} decreased={} artifacts={}",
                run.week,
                run.stores,
                run.total_changes,
                run.models_increased,
                run.models_decreased,
                run.artifacts.len()
            );
            Ok(())
        }
        Err(PipelineError::PartialWrite { summary }) => {
            for failure in &summary.failed_artifacts {
                eprintln!("artifact failed: {failure}");
            }
            anyhow::bail!(
                "week {} processed with {} failed artifact(s)",
                summary.week,
                summary.failed_artifacts.len()
            )
        }
        Err(err) => Err(err.into()),
    }
}

fn notify(
    week: u32,
    reports_dir: Option<PathBuf>,
    outbox: Option<PathBuf>,
    recipient: Option<String>,
    rollup_to: Option<String>,
) -> Result<()> {
    let dir = reports_dir.unwrap_or_else(|| PipelineConfig::from_env().reports_dir);
    let summary_path = dir.join(rdt_engine::report::alert_summary_filename(week));
    let file = File::open(&summary_path)
        .with_context(|| format!("opening {}", summary_path.display()))?;
    let summary: AlertSummary = serde_json::from_reader(file)
        .with_context(|| format!("parsing {}", summary_path.display()))?;

    let dispatcher: Box<dyn NotificationDispatcher> = match outbox {
        Some(dir) => Box::new(FileOutboxDispatcher::new(dir)),
        None => Box::new(LogDispatcher),
    };

    if let Some(email) = recipient {
        rdt_notify::resend(dispatcher.as_ref(), &summary, &email)?;
        println!("week {week}: resent alert to {email}");
        return Ok(());
    }

    let reports = rdt_notify::notify_all(dispatcher.as_ref(), &summary, rollup_to.as_deref());
    let failed = reports.iter().filter(|r| r.result.is_err()).count();
    println!(
        "week {week}: {} notification(s) delivered, {failed} failed",
        reports.len() - failed
    );
    if failed > 0 {
        anyhow::bail!("{failed} notification(s) failed");
    }
    Ok(())
}

fn load_contacts(path: Option<PathBuf>) -> Result<ContactDirectory> {
    let path = match path {
        Some(path) => Some(path),
        None => std::env::var("RDT_CONTACTS_FILE").ok().map(PathBuf::from),
    };
    match path {
        Some(path) => ContactDirectory::from_csv_path(&path)
            .with_context(|| format!("loading contacts from {}", path.display())),
        None => {
            eprintln!("no contacts file configured; recipient grouping will be empty");
            Ok(ContactDirectory::default())
        }
    }
}
