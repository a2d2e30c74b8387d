use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};

pub const LAST_COMMIT_SHA: &str = "last_commit_sha";
pub const FACEBOOK_RECIPIENT_PSID: &str = "facebook_recipient_psid";

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Append-only: one row per normalized apply link, ever
        CREATE TABLE IF NOT EXISTS processed_jobs (
            link_hash  TEXT PRIMARY KEY,
            company    TEXT,
            role       TEXT,
            score      INTEGER,
            notified   INTEGER,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS state (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

// ── State ──

pub fn get_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM state WHERE key = ?1", [key], |r| r.get(0))
        .optional()?;
    Ok(value)
}

pub fn set_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

pub fn get_last_commit_sha(conn: &Connection) -> Result<Option<String>> {
    get_state(conn, LAST_COMMIT_SHA)
}

pub fn set_last_commit_sha(conn: &Connection, sha: &str) -> Result<()> {
    set_state(conn, LAST_COMMIT_SHA, sha)
}

// ── Processed jobs ──

pub struct ProcessedJob {
    pub link_hash: String,
    pub company: String,
    pub role: String,
    pub score: u8,
    pub notified: bool,
}

pub fn exists(conn: &Connection, link_hash: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM processed_jobs WHERE link_hash = ?1 LIMIT 1",
            [link_hash],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Insert a processed job. Re-inserting an existing hash is a no-op; returns
/// whether a row was written.
pub fn insert_processed_job(conn: &Connection, job: &ProcessedJob) -> Result<bool> {
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false);
    let n = conn.execute(
        "INSERT OR IGNORE INTO processed_jobs (link_hash, company, role, score, notified, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![job.link_hash, job.company, job.role, job.score, job.notified, created_at],
    )?;
    Ok(n == 1)
}

// ── Stats ──

pub struct Stats {
    pub processed: usize,
    pub notified: usize,
    pub zero_score: usize,
    pub last_commit_sha: Option<String>,
    pub captured_psid: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let processed: usize = conn.query_row("SELECT COUNT(*) FROM processed_jobs", [], |r| r.get(0))?;
    let notified: usize = conn.query_row(
        "SELECT COUNT(*) FROM processed_jobs WHERE notified = 1",
        [],
        |r| r.get(0),
    )?;
    let zero_score: usize = conn.query_row(
        "SELECT COUNT(*) FROM processed_jobs WHERE score = 0",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        processed,
        notified,
        zero_score,
        last_commit_sha: get_last_commit_sha(conn)?,
        captured_psid: get_state(conn, FACEBOOK_RECIPIENT_PSID)?,
    })
}

#[cfg(test)]
pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}

#[cfg(test)]
pub fn count_processed(conn: &Connection) -> usize {
    conn.query_row("SELECT COUNT(*) FROM processed_jobs", [], |r| r.get(0))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(hash: &str, notified: bool) -> ProcessedJob {
        ProcessedJob {
            link_hash: hash.into(),
            company: "Acme".into(),
            role: "SWE Intern".into(),
            score: 80,
            notified,
        }
    }

    #[test]
    fn state_upsert() {
        let conn = test_conn();
        assert_eq!(get_last_commit_sha(&conn).unwrap(), None);
        set_last_commit_sha(&conn, "abc").unwrap();
        set_last_commit_sha(&conn, "def").unwrap();
        assert_eq!(get_last_commit_sha(&conn).unwrap().as_deref(), Some("def"));
    }

    #[test]
    fn insert_is_idempotent() {
        let conn = test_conn();
        assert!(!exists(&conn, "h1").unwrap());
        assert!(insert_processed_job(&conn, &job("h1", true)).unwrap());
        assert!(!insert_processed_job(&conn, &job("h1", false)).unwrap());
        assert!(exists(&conn, "h1").unwrap());
        assert_eq!(count_processed(&conn), 1);

        let notified: bool = conn
            .query_row("SELECT notified FROM processed_jobs WHERE link_hash = 'h1'", [], |r| r.get(0))
            .unwrap();
        assert!(notified);
    }

    #[test]
    fn stats_counts() {
        let conn = test_conn();
        insert_processed_job(&conn, &job("h1", true)).unwrap();
        insert_processed_job(&conn, &ProcessedJob { score: 0, ..job("h2", false) }).unwrap();
        set_state(&conn, FACEBOOK_RECIPIENT_PSID, "psid-1").unwrap();
        let s = get_stats(&conn).unwrap();
        assert_eq!((s.processed, s.notified, s.zero_score), (2, 1, 1));
        assert_eq!(s.captured_psid.as_deref(), Some("psid-1"));
        assert_eq!(s.last_commit_sha, None);
    }
}
