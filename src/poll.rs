use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::classifier::{Classifier, JobAnalysis};
use crate::db::{self, ProcessedJob};
use crate::notify::{Channel, ChannelStatus, Notice};
use crate::parser::links::domain_of;
use crate::parser::record::{build_candidate, FieldNames};
use crate::parser::{age, diff, rows};
use crate::sources::{RecordSource, RevisionSource};

const UNKNOWN: &str = "Unknown";

/// One listing pulled from a source, not yet classified.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCandidate {
    pub row_payload: String,
    pub apply_url: String,
    pub company_fallback: String,
    pub role_fallback: String,
    pub posted_age: Option<String>,
    pub posted_date: Option<NaiveDate>,
}

/// Dedup key: sha256 hex of the normalized apply url.
pub fn link_hash(apply_url: &str) -> String {
    hex::encode(Sha256::digest(apply_url.as_bytes()))
}

/// Candidate for one reconstructed table row; rows without an apply link
/// are dropped.
pub fn candidate_from_row(row: &str, now: DateTime<Utc>) -> Option<JobCandidate> {
    let apply_url = rows::extract_apply_link(row)?;
    let posted_age = rows::extract_posted_age(row);
    let posted_date = age::estimate_date(posted_age.as_deref(), now);
    let (company, role, _) = rows::extract_company_role_location(row);

    Some(JobCandidate {
        row_payload: row.to_string(),
        apply_url,
        company_fallback: company.unwrap_or_else(|| UNKNOWN.into()),
        role_fallback: role.unwrap_or_else(|| UNKNOWN.into()),
        posted_age,
        posted_date,
    })
}

// ── Revision source state machine ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// No checkpoint yet: adopt the current revision without processing history.
    NoCheckpoint,
    UpToDate,
    Processing { from: String },
}

impl PollState {
    pub fn decide(checkpoint: Option<&str>, current: &str) -> Self {
        match checkpoint {
            None => PollState::NoCheckpoint,
            Some(c) if c == current => PollState::UpToDate,
            Some(c) => PollState::Processing { from: c.to_string() },
        }
    }
}

pub struct RevisionFetch {
    pub current: String,
    pub state: PollState,
    pub candidates: Vec<JobCandidate>,
}

pub async fn fetch_revision_candidates(
    source: &dyn RevisionSource,
    checkpoint: Option<&str>,
    now: DateTime<Utc>,
) -> Result<RevisionFetch> {
    let current = source.current_revision().await?;
    let state = PollState::decide(checkpoint, &current);

    let candidates = match &state {
        PollState::Processing { from } => {
            let added = source.added_lines(from, &current).await?;
            let rows = diff::reconstruct_rows(&added);
            let candidates: Vec<_> = rows.iter().filter_map(|r| candidate_from_row(r, now)).collect();
            info!(
                "{} added line(s) -> {} row(s) -> {} candidate(s)",
                added.len(),
                rows.len(),
                candidates.len()
            );
            candidates
        }
        _ => Vec::new(),
    };

    Ok(RevisionFetch {
        current,
        state,
        candidates,
    })
}

pub async fn fetch_record_candidates(
    source: &dyn RecordSource,
    fields: &FieldNames,
) -> Result<Vec<JobCandidate>> {
    let records = source.list_records().await?;
    let candidates: Vec<_> = records.iter().filter_map(|r| build_candidate(r, fields)).collect();
    info!(
        "{} record(s) -> {} candidate(s)",
        records.len(),
        candidates.len()
    );
    Ok(candidates)
}

// ── Candidate pipeline ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AlreadySeen,
    ClassifyFailed,
    BelowThreshold,
    Notified,
    /// Qualified, but no channel delivered it.
    Undelivered,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub candidates: usize,
    pub already_seen: usize,
    pub classify_failed: usize,
    pub below_threshold: usize,
    pub notified: usize,
    pub undelivered: usize,
    pub delivery_failures: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::AlreadySeen => self.already_seen += 1,
            Outcome::ClassifyFailed => self.classify_failed += 1,
            Outcome::BelowThreshold => self.below_threshold += 1,
            Outcome::Notified => self.notified += 1,
            Outcome::Undelivered => self.undelivered += 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
}

/// Dedup → classify → notify → persist, one candidate at a time. The
/// processed-jobs table is the only concurrency control, so candidates must
/// never be processed in parallel.
pub struct Pipeline<'a> {
    pub conn: &'a Connection,
    pub classifier: &'a dyn Classifier,
    pub channels: &'a [Box<dyn Channel>],
    pub min_notify_score: u8,
}

impl Pipeline<'_> {
    pub fn qualifies(&self, job: &JobAnalysis) -> bool {
        job.is_tech_intern && job.prestige_score >= self.min_notify_score
    }

    pub async fn process_batch(&self, candidates: &[JobCandidate]) -> Result<BatchReport> {
        let mut report = BatchReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        for candidate in candidates {
            let (outcome, fan_out) = self.process_candidate(candidate).await?;
            report.record(outcome);
            report.delivery_failures += fan_out.failed;
        }
        Ok(report)
    }

    pub async fn process_candidate(&self, c: &JobCandidate) -> Result<(Outcome, FanOut)> {
        let key = link_hash(&c.apply_url);
        if db::exists(self.conn, &key)? {
            info!("Skipping existing job: {}", c.apply_url);
            return Ok((Outcome::AlreadySeen, FanOut::default()));
        }

        let analysis = match self.classifier.classify(&c.row_payload).await {
            Ok(a) => a,
            Err(e) => {
                warn!(
                    "Classification failed for {} ({}); recording as processed without notification",
                    c.apply_url, e
                );
                db::insert_processed_job(
                    self.conn,
                    &ProcessedJob {
                        link_hash: key,
                        company: c.company_fallback.clone(),
                        role: c.role_fallback.clone(),
                        score: 0,
                        notified: false,
                    },
                )?;
                return Ok((Outcome::ClassifyFailed, FanOut::default()));
            }
        };

        let (outcome, fan_out) = if self.qualifies(&analysis) {
            let fan_out = self.fan_out(&analysis, c).await;
            let outcome = if fan_out.delivered > 0 {
                Outcome::Notified
            } else {
                Outcome::Undelivered
            };
            (outcome, fan_out)
        } else {
            info!(
                company = %analysis.company,
                role = %analysis.role,
                score = analysis.prestige_score,
                tech = analysis.is_tech_intern,
                domain = %domain_of(&c.apply_url),
                "Skipping notification"
            );
            (Outcome::BelowThreshold, FanOut::default())
        };

        db::insert_processed_job(
            self.conn,
            &ProcessedJob {
                link_hash: key,
                company: or_fallback(&analysis.company, &c.company_fallback),
                role: or_fallback(&analysis.role, &c.role_fallback),
                score: analysis.prestige_score,
                notified: outcome == Outcome::Notified,
            },
        )?;
        Ok((outcome, fan_out))
    }

    /// Try every live channel; one failing never blocks the others.
    pub async fn fan_out(&self, job: &JobAnalysis, c: &JobCandidate) -> FanOut {
        let notice = Notice {
            job,
            apply_url: &c.apply_url,
            posted_age: c.posted_age.as_deref(),
            posted_date: c.posted_date,
        };

        let mut result = FanOut::default();
        for channel in self.channels {
            match channel.status() {
                ChannelStatus::Disabled => {}
                ChannelStatus::Stub { reason } => {
                    info!("{} channel not sending ({}): {}", channel.name(), reason, c.apply_url);
                }
                ChannelStatus::Live => match channel.send(&notice).await {
                    Ok(()) => result.delivered += 1,
                    Err(e) => {
                        error!("Failed to send {} notification for {}: {:#}", channel.name(), c.apply_url, e);
                        result.failed += 1;
                    }
                },
            }
        }
        result
    }
}

fn or_fallback(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

// ── Cycle ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionOutcome {
    Bootstrapped { revision: String },
    UpToDate { revision: String },
    Processed { from: String, to: String, batch: BatchReport },
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub revision: Option<RevisionOutcome>,
    pub records: Option<BatchReport>,
    pub failed_sources: Vec<&'static str>,
}

#[derive(Clone, Copy, Default)]
pub struct Sources<'a> {
    pub revision: Option<&'a dyn RevisionSource>,
    pub records: Option<&'a dyn RecordSource>,
}

/// One poll cycle over the enabled sources.
///
/// Fetches run concurrently; batches are processed sequentially afterwards.
/// The revision checkpoint only moves after its batch is fully persisted, so
/// an interrupted cycle replays the same diff next time and the dedup check
/// skips what was already recorded. A failing source is tolerated as long as
/// another one succeeded.
pub async fn run_cycle(
    pipeline: &Pipeline<'_>,
    sources: Sources<'_>,
    fields: &FieldNames,
    now: DateTime<Utc>,
) -> Result<CycleReport> {
    let checkpoint = db::get_last_commit_sha(pipeline.conn)?;

    let revision_fetch = async {
        match sources.revision {
            Some(s) => Some(fetch_revision_candidates(s, checkpoint.as_deref(), now).await),
            None => None,
        }
    };
    let record_fetch = async {
        match sources.records {
            Some(s) => Some(fetch_record_candidates(s, fields).await),
            None => None,
        }
    };
    let (revision_result, record_result) = tokio::join!(revision_fetch, record_fetch);

    let mut report = CycleReport::default();
    let mut errors: Vec<(&'static str, anyhow::Error)> = Vec::new();

    match revision_result {
        Some(Ok(fetch)) => report.revision = Some(apply_revision(pipeline, fetch).await?),
        Some(Err(e)) => {
            error!("GitHub source failed: {:#}", e);
            errors.push(("github", e));
        }
        None => {}
    }

    match record_result {
        Some(Ok(candidates)) => {
            let batch = pipeline.process_batch(&candidates).await?;
            info!("Airtable batch done: {:?}", batch);
            report.records = Some(batch);
        }
        Some(Err(e)) => {
            error!("Airtable source failed: {:#}", e);
            errors.push(("airtable", e));
        }
        None => {}
    }

    let enabled = usize::from(sources.revision.is_some()) + usize::from(sources.records.is_some());
    report.failed_sources = errors.iter().map(|(name, _)| *name).collect();

    if !errors.is_empty() && errors.len() == enabled {
        if errors.len() == 1 {
            return Err(errors.remove(0).1);
        }
        return Err(anyhow!("All sources failed: {}", report.failed_sources.join(", ")));
    }
    if !errors.is_empty() {
        warn!(
            "Source(s) {} failed, but the other source was processed successfully",
            report.failed_sources.join(", ")
        );
    }

    Ok(report)
}

async fn apply_revision(pipeline: &Pipeline<'_>, fetch: RevisionFetch) -> Result<RevisionOutcome> {
    let RevisionFetch {
        current,
        state,
        candidates,
    } = fetch;

    match state {
        PollState::NoCheckpoint => {
            info!("No previous commit found. Bootstrapping with current SHA: {}", current);
            db::set_last_commit_sha(pipeline.conn, &current)?;
            Ok(RevisionOutcome::Bootstrapped { revision: current })
        }
        PollState::UpToDate => {
            info!("No new commits since last run ({})", current);
            Ok(RevisionOutcome::UpToDate { revision: current })
        }
        PollState::Processing { from } => {
            let batch = pipeline.process_batch(&candidates).await?;
            db::set_last_commit_sha(pipeline.conn, &current)?;
            info!("GitHub batch done: {:?}. Updated last processed SHA to {}", batch, current);
            Ok(RevisionOutcome::Processed {
                from,
                to: current,
                batch,
            })
        }
    }
}
