mod classifier;
mod config;
mod db;
mod http;
mod inspect;
mod notify;
mod parser;
mod poll;
mod sources;
#[cfg(test)]
mod testing;
mod webhook;

use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing::info;

use classifier::OpenAiClassifier;
use config::Settings;
use poll::{Pipeline, RevisionOutcome, Sources};
use sources::airtable::AirtableSource;
use sources::github::GithubSource;
use sources::{RecordSource, RevisionSource};

#[derive(Parser)]
#[command(
    name = "internship_radar",
    about = "Poll internship listings, score them with an LLM and notify on good matches"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one poll cycle over the configured sources
    Run,
    /// Print per-row decisions for one GitHub diff without touching the database
    Debug {
        /// Base commit (default: stored checkpoint)
        #[arg(long)]
        old_sha: Option<String>,
        /// Head commit (default: current branch head)
        #[arg(long)]
        new_sha: Option<String>,
        /// Process at most N reconstructed rows (0 = all)
        #[arg(short = 'n', long, default_value = "0")]
        max_rows: usize,
        /// Also evaluate links already in processed_jobs
        #[arg(long)]
        include_processed: bool,
        /// Actually send notifications for eligible rows
        #[arg(long)]
        send: bool,
    },
    /// Serve the Messenger webhook that captures recipient PSIDs
    Webhook {
        /// Listen port (default: WEBHOOK_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show database statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;

    let result = match cli.command {
        Commands::Run => {
            settings.validate()?;
            let conn = open_db(&settings)?;
            use_captured_psid(&mut settings, &conn)?;

            let classifier = OpenAiClassifier::new(&settings);
            let channels = notify::channels_from_settings(&settings);
            let pipeline = Pipeline {
                conn: &conn,
                classifier: &classifier,
                channels: &channels,
                min_notify_score: settings.min_notify_score,
            };

            let github = settings
                .source_type
                .uses_github()
                .then(|| GithubSource::new(&settings));
            let airtable = if settings.source_type.uses_airtable() {
                Some(AirtableSource::new(&settings)?)
            } else {
                None
            };
            let sources = Sources {
                revision: github.as_ref().map(|s| s as &dyn RevisionSource),
                records: airtable.as_ref().map(|s| s as &dyn RecordSource),
            };

            info!("Starting poll cycle ({:?} source)", settings.source_type);
            let report = poll::run_cycle(&pipeline, sources, &settings.airtable_fields(), Utc::now()).await?;

            match &report.revision {
                Some(RevisionOutcome::Bootstrapped { revision }) => {
                    println!("GitHub: bootstrapped checkpoint at {}", revision)
                }
                Some(RevisionOutcome::UpToDate { revision }) => println!("GitHub: up to date at {}", revision),
                Some(RevisionOutcome::Processed { from, to, batch }) => println!(
                    "GitHub {}..{}: {} candidates, {} notified, {} seen, {} below threshold, {} classify errors",
                    short_sha(from),
                    short_sha(to),
                    batch.candidates,
                    batch.notified,
                    batch.already_seen,
                    batch.below_threshold,
                    batch.classify_failed
                ),
                None => {}
            }
            if let Some(batch) = &report.records {
                println!(
                    "Airtable: {} candidates, {} notified, {} seen, {} below threshold, {} classify errors",
                    batch.candidates, batch.notified, batch.already_seen, batch.below_threshold, batch.classify_failed
                );
            }
            if !report.failed_sources.is_empty() {
                println!("Failed sources: {}", report.failed_sources.join(", "));
            }
            Ok(())
        }
        Commands::Debug {
            old_sha,
            new_sha,
            max_rows,
            include_processed,
            send,
        } => {
            settings.validate()?;
            let conn = open_db(&settings)?;
            use_captured_psid(&mut settings, &conn)?;

            let classifier = OpenAiClassifier::new(&settings);
            let channels = notify::channels_from_settings(&settings);
            let pipeline = Pipeline {
                conn: &conn,
                classifier: &classifier,
                channels: &channels,
                min_notify_score: settings.min_notify_score,
            };
            let github = GithubSource::new(&settings);
            let opts = inspect::DebugOptions {
                old_sha: old_sha.filter(|s| !s.trim().is_empty()),
                new_sha: new_sha.filter(|s| !s.trim().is_empty()),
                max_rows,
                include_processed,
                send,
            };

            let counters = inspect::debug_diff(&pipeline, &github, &opts, Utc::now()).await?;
            inspect::print_summary(&counters);
            Ok(())
        }
        Commands::Webhook { port } => {
            let conn = open_db(&settings)?;
            if settings.facebook_webhook_verify_token.is_none() {
                tracing::warn!("FACEBOOK_WEBHOOK_VERIFY_TOKEN is not set; verification requests will fail");
            }
            let app = webhook::router(
                conn,
                settings.facebook_webhook_verify_token.clone(),
                settings.facebook_app_secret.clone(),
            );
            webhook::serve(app, port.unwrap_or(settings.webhook_port)).await
        }
        Commands::Stats => {
            let conn = open_db(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Processed:   {}", s.processed);
            println!("Notified:    {}", s.notified);
            println!("Score zero:  {}", s.zero_score);
            println!("Checkpoint:  {}", s.last_commit_sha.as_deref().unwrap_or("-"));
            println!("Captured PSID: {}", s.captured_psid.as_deref().unwrap_or("-"));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_db(settings: &Settings) -> anyhow::Result<Connection> {
    let conn = db::connect(&settings.database_path)?;
    db::init_schema(&conn).context("Failed to initialize database schema")?;
    Ok(conn)
}

/// DM recipient falls back to the PSID captured by the webhook.
fn use_captured_psid(settings: &mut Settings, conn: &Connection) -> anyhow::Result<()> {
    if settings.facebook_auto_use_captured_psid && settings.facebook_recipient_psid.is_none() {
        if let Some(psid) = db::get_state(conn, db::FACEBOOK_RECIPIENT_PSID)? {
            info!("Using captured Facebook PSID from database");
            settings.facebook_recipient_psid = Some(psid);
        }
    }
    Ok(())
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
