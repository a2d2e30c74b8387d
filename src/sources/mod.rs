pub mod airtable;
pub mod github;

use anyhow::Result;
use async_trait::async_trait;

use crate::parser::record::Fields;

/// A document with linear, diffable history.
#[async_trait]
pub trait RevisionSource: Send + Sync {
    async fn current_revision(&self) -> Result<String>;

    /// Lines added to the tracked document between two revisions, in order.
    async fn added_lines(&self, old: &str, new: &str) -> Result<Vec<String>>;
}

/// A snapshot of structured records with no history.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn list_records(&self) -> Result<Vec<Fields>>;
}
