use std::collections::BTreeMap;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::db;
use crate::notify::{ChannelStatus, Notice};
use crate::parser::{diff, rows};
use crate::poll::{candidate_from_row, link_hash, Pipeline};
use crate::sources::RevisionSource;

#[derive(Debug, Default, Clone)]
pub struct DebugOptions {
    /// Defaults to the stored checkpoint.
    pub old_sha: Option<String>,
    /// Defaults to the current branch head.
    pub new_sha: Option<String>,
    /// 0 = all rows.
    pub max_rows: usize,
    pub include_processed: bool,
    pub send: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DebugCounters {
    pub total_rows: usize,
    pub no_apply_link: usize,
    pub already_processed: usize,
    pub classify_failed: usize,
    pub skipped_not_tech: usize,
    pub skipped_low_score: usize,
    pub eligible: usize,
    pub sent: BTreeMap<&'static str, usize>,
    pub send_failed: BTreeMap<&'static str, usize>,
}

/// Walk one diff and print the decision for every reconstructed row.
/// Nothing is written to the store; notifications only go out with `send`.
pub async fn debug_diff(
    pipeline: &Pipeline<'_>,
    source: &dyn RevisionSource,
    opts: &DebugOptions,
    now: DateTime<Utc>,
) -> Result<DebugCounters> {
    let old_sha = match opts.old_sha.clone() {
        Some(sha) => sha,
        None => match db::get_last_commit_sha(pipeline.conn)? {
            Some(sha) => sha,
            None => bail!("No old SHA (last_commit_sha is empty). Use --old-sha or run once to bootstrap"),
        },
    };
    let new_sha = match opts.new_sha.clone() {
        Some(sha) => sha,
        None => source.current_revision().await?,
    };

    println!("old_sha={}", old_sha);
    println!("new_sha={}", new_sha);
    println!("min_notify_score={}", pipeline.min_notify_score);
    for channel in pipeline.channels {
        println!("channel {}={:?}", channel.name(), channel.status());
    }
    println!("send_mode={}", if opts.send { "ON" } else { "OFF (dry-run)" });
    println!();

    let added = source.added_lines(&old_sha, &new_sha).await?;
    let mut reconstructed = diff::reconstruct_rows(&added);
    if opts.max_rows > 0 {
        reconstructed.truncate(opts.max_rows);
    }

    let mut counters = DebugCounters {
        total_rows: reconstructed.len(),
        ..Default::default()
    };
    println!("reconstructed_rows={}", reconstructed.len());

    for (idx, row) in reconstructed.iter().enumerate().map(|(i, r)| (i + 1, r)) {
        let Some(candidate) = candidate_from_row(row, now) else {
            counters.no_apply_link += 1;
            println!("[{}] SKIP no_apply_link", idx);
            continue;
        };

        if !opts.include_processed && db::exists(pipeline.conn, &link_hash(&candidate.apply_url))? {
            counters.already_processed += 1;
            println!("[{}] SKIP already_processed link={}", idx, candidate.apply_url);
            continue;
        }

        let job = match pipeline.classifier.classify(&candidate.row_payload).await {
            Ok(job) => job,
            Err(e) => {
                counters.classify_failed += 1;
                println!(
                    "[{}] SKIP classify_failed company={} role={} error={}",
                    idx, candidate.company_fallback, candidate.role_fallback, e
                );
                continue;
            }
        };

        let mut reasons = Vec::new();
        if !job.is_tech_intern {
            counters.skipped_not_tech += 1;
            reasons.push("not_tech".to_string());
        }
        if job.prestige_score < pipeline.min_notify_score {
            counters.skipped_low_score += 1;
            reasons.push(format!("score<{}", pipeline.min_notify_score));
        }

        let (_, _, row_location) = rows::extract_company_role_location(row);
        let location = if job.location.trim().is_empty() {
            row_location.unwrap_or_else(|| "Unknown".into())
        } else {
            job.location.clone()
        };
        let verdict = if reasons.is_empty() {
            "ELIGIBLE".to_string()
        } else {
            format!("SKIP {}", reasons.join(","))
        };
        println!(
            "[{}] {} company={} role={} score={} tech={} location_fit={} location={}",
            idx,
            verdict,
            job.company,
            job.role,
            job.prestige_score,
            job.is_tech_intern,
            job.location_priority.label(),
            location
        );
        if !reasons.is_empty() {
            continue;
        }

        counters.eligible += 1;
        println!("      apply={}", candidate.apply_url);
        if !opts.send {
            continue;
        }

        let notice = Notice {
            job: &job,
            apply_url: &candidate.apply_url,
            posted_age: candidate.posted_age.as_deref(),
            posted_date: candidate.posted_date,
        };
        for channel in pipeline.channels {
            match channel.status() {
                ChannelStatus::Disabled => {}
                ChannelStatus::Stub { reason } => println!("      {}=stub ({})", channel.name(), reason),
                ChannelStatus::Live => match channel.send(&notice).await {
                    Ok(()) => {
                        *counters.sent.entry(channel.name()).or_default() += 1;
                        println!("      {}=ok", channel.name());
                    }
                    Err(e) => {
                        *counters.send_failed.entry(channel.name()).or_default() += 1;
                        println!("      {}=failed error={:#}", channel.name(), e);
                    }
                },
            }
        }
    }

    Ok(counters)
}

pub fn print_summary(c: &DebugCounters) {
    println!("\nSummary");
    println!("total_rows={}", c.total_rows);
    println!("no_apply_link={}", c.no_apply_link);
    println!("already_processed={}", c.already_processed);
    println!("classify_failed={}", c.classify_failed);
    println!("skipped_not_tech={}", c.skipped_not_tech);
    println!("skipped_low_score={}", c.skipped_low_score);
    println!("eligible={}", c.eligible);
    for (name, n) in &c.sent {
        println!("{}_ok={}", name, n);
    }
    for (name, n) in &c.send_failed {
        println!("{}_failed={}", name, n);
    }
}
