use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::RecordSource;
use crate::config::Settings;
use crate::http::{self, MAX_ATTEMPTS};
use crate::parser::record::{FieldValue, Fields};

const API_BASE: &str = "https://api.airtable.com/v0";
const PAGE_SIZE: &str = "100";

pub struct AirtableSource {
    client: reqwest::Client,
    pat: String,
    endpoint: String,
    view: Option<String>,
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    records: Vec<serde_json::Value>,
    offset: Option<String>,
}

impl AirtableSource {
    /// Expects validated settings (PAT and ids present).
    pub fn new(settings: &Settings) -> Result<Self> {
        let pat = settings.airtable_pat.clone().context("AIRTABLE_PAT is missing")?;
        let base = settings.airtable_base_id.as_deref().context("Airtable base id is missing")?;
        let table = settings.airtable_table_id.as_deref().context("Airtable table id is missing")?;
        Ok(Self {
            client: http::client(settings.request_timeout_seconds),
            pat,
            endpoint: format!("{}/{}/{}", API_BASE, base, table),
            view: settings.airtable_view.clone(),
        })
    }
}

#[async_trait]
impl RecordSource for AirtableSource {
    async fn list_records(&self) -> Result<Vec<Fields>> {
        let mut all = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut params: Vec<(&str, &str)> = vec![("pageSize", PAGE_SIZE)];
            if let Some(view) = &self.view {
                params.push(("view", view.as_str()));
            }
            if let Some(o) = &offset {
                params.push(("offset", o.as_str()));
            }

            let page: Page = http::json_with_retry("Airtable", MAX_ATTEMPTS, || {
                self.client
                    .get(&self.endpoint)
                    .bearer_auth(&self.pat)
                    .query(&params)
            })
            .await?;
            debug!("Airtable page with {} record(s)", page.records.len());

            all.extend(page.records.into_iter().filter_map(record_fields));

            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }

        info!("Fetched {} Airtable record(s)", all.len());
        Ok(all)
    }
}

/// The `fields` object of one record; records without one are skipped.
fn record_fields(record: serde_json::Value) -> Option<Fields> {
    let fields = match record {
        serde_json::Value::Object(mut map) => map.remove("fields")?,
        _ => return None,
    };
    match FieldValue::from(fields) {
        FieldValue::Map(entries) => Some(entries),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fields_of_record() {
        let f = record_fields(json!({"id": "rec1", "fields": {"Company": "Acme", "Apply": "https://a.io"}}))
            .unwrap();
        assert_eq!(f.len(), 2);
        assert_eq!(f[0].0, "Company");
        assert_eq!(f[1].1, FieldValue::Text("https://a.io".into()));
    }

    #[test]
    fn malformed_records_skipped() {
        assert!(record_fields(json!("rec1")).is_none());
        assert!(record_fields(json!({"id": "rec1"})).is_none());
        assert!(record_fields(json!({"fields": ["x"]})).is_none());
    }
}
