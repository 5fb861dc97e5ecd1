use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fieldsync_core::{CaptureInput, RecordId, RecordStatus};
use fieldsync_queue::{CancelOutcome, DrainReport};
use fieldsync_runner::FieldSync;

#[derive(Parser)]
#[command(name = "fieldsync", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize fieldsync in the current directory (creates .fieldsync/, config, db)
    Init,

    /// Queue a file as evidence for a job milestone
    Capture {
        #[arg(long)]
        job: String,
        #[arg(long)]
        milestone: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
    },

    /// Show queued evidence
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Upload pending and failed records now
    Retry,

    /// Drop a record that is not mid-upload
    Cancel {
        #[arg(long)]
        id: String,
    },

    /// Remove synced records and their payloads
    Cleanup,

    /// Run one background sync cycle: worker wake-up, then page drain
    Sync,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;

    match cli.cmd {
        Command::Init => {
            FieldSync::init_repo(&repo_root)?;
            println!("Initialized fieldsync in {}", repo_root.display());
        }
        Command::Capture { job, milestone, file, mime } => {
            let app = FieldSync::open(repo_root)?;
            let bytes = std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            let name = file
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("evidence")
                .to_string();
            let rec = app.capture(CaptureInput::from_bytes(job, milestone, name, mime, bytes)).await?;
            println!("Queued {} ({} bytes, {})", rec.id, rec.size_bytes(), rec.content_hash);
        }
        Command::Status { json } => {
            let app = FieldSync::open(repo_root)?;
            let snap = app.queue.refresh().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(snap.records.as_ref())?);
                return Ok(());
            }
            for status in RecordStatus::ALL {
                println!("{}: {}", status, snap.count(status));
            }
            for r in snap.records.iter() {
                let detail = r.last_error.as_deref().or(r.remote_url.as_deref()).unwrap_or("");
                println!("- {} [{}] {}/{} {} {}", r.id, r.status, r.job_id, r.milestone_id, r.file_name, detail);
            }
        }
        Command::Retry => {
            let app = FieldSync::open(repo_root)?;
            print_report(&app.retry_now().await?);
        }
        Command::Cancel { id } => {
            let app = FieldSync::open(repo_root)?;
            match app.queue.cancel(&RecordId::from_str(id.clone())).await? {
                CancelOutcome::Removed => println!("Cancelled {}", id),
                CancelOutcome::Missing => println!("No record {}", id),
                CancelOutcome::InFlight => anyhow::bail!("record {id} is uploading; try again later"),
                CancelOutcome::Synced => anyhow::bail!("record {id} is already synced; use cleanup"),
            }
        }
        Command::Cleanup => {
            let app = FieldSync::open(repo_root)?;
            let removed = app.queue.cleanup_synced().await?;
            println!("Removed {} synced record(s)", removed);
        }
        Command::Sync => {
            let app = FieldSync::open(repo_root)?;
            print_report(&app.sync_once().await?);
        }
    }

    Ok(())
}

fn print_report(report: &DrainReport) {
    println!(
        "attempted {} synced {} failed {} skipped {}",
        report.attempted, report.synced, report.failed, report.skipped
    );
}
