use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;

use super::links::normalize;
use crate::poll::JobCandidate;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"https?://[^\s<>"]+"#).unwrap());

const DISPLAY_KEYS: &[&str] = &["url", "href", "link", "name", "label", "title"];
const URL_KEYS: &[&str] = &["url", "href", "link"];
const URL_FIELD_HINTS: &[&str] = &["apply", "job", "link", "url"];

/// One Airtable cell value. Attachments, linked records, lookups and
/// collaborator cells arrive as arbitrarily nested lists/objects.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    List(Vec<FieldValue>),
    Map(Vec<(String, FieldValue)>),
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => FieldValue::Number(n),
            Value::String(s) => FieldValue::Text(s),
            Value::Array(items) => FieldValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => FieldValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl FieldValue {
    fn get(&self, key: &str) -> Option<&FieldValue> {
        match self {
            FieldValue::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    fn non_empty_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }
}

/// Field names of a record, in table order.
pub type Fields = Vec<(String, FieldValue)>;

/// Flatten a value to display text.
pub fn stringify(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Text(s) => s.trim().to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Map(entries) => {
            if let Some(text) = DISPLAY_KEYS
                .iter()
                .find_map(|k| value.get(k).and_then(FieldValue::non_empty_text))
            {
                return text.to_string();
            }
            join_non_empty(entries.iter().map(|(_, v)| v))
        }
        FieldValue::List(items) => join_non_empty(items.iter()),
    }
}

fn join_non_empty<'a>(values: impl Iterator<Item = &'a FieldValue>) -> String {
    values
        .map(stringify)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// First URL-looking leaf, depth-first.
pub fn find_url(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Text(s) => {
            let text = s.trim();
            if text.starts_with("http://") || text.starts_with("https://") {
                return Some(text.to_string());
            }
            URL_RE
                .find(text)
                .map(|m| m.as_str().trim_end_matches([')', '.', ',']).to_string())
        }
        FieldValue::Map(entries) => URL_KEYS
            .iter()
            .find_map(|k| value.get(k).and_then(FieldValue::non_empty_text))
            .map(str::to_string)
            .or_else(|| entries.iter().find_map(|(_, v)| find_url(v))),
        FieldValue::List(items) => items.iter().find_map(find_url),
        _ => None,
    }
}

/// ISO date, or the date part of an ISO datetime.
pub fn coerce_iso_date(value: &FieldValue) -> Option<NaiveDate> {
    let text = stringify(value);
    if text.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt.date_naive());
    }
    NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|dt| dt.date())
}

/// Which Airtable columns carry the well-known fields.
#[derive(Debug, Clone)]
pub struct FieldNames {
    pub apply: String,
    pub company: String,
    pub role: String,
    pub location: String,
    pub date: String,
}

fn field<'a>(fields: &'a Fields, name: &str) -> Option<&'a FieldValue> {
    fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

fn apply_url(fields: &Fields, preferred: &str) -> Option<String> {
    if let Some(url) = field(fields, preferred).and_then(find_url) {
        return Some(url);
    }
    fields
        .iter()
        .filter(|(k, _)| {
            let lower = k.to_lowercase();
            URL_FIELD_HINTS.iter().any(|h| lower.contains(h))
        })
        .find_map(|(_, v)| find_url(v))
}

/// `key: value | key: value` over the non-empty fields.
pub fn row_payload(fields: &Fields) -> String {
    fields
        .iter()
        .filter_map(|(k, v)| {
            let text = stringify(v);
            (!text.is_empty()).then(|| format!("{}: {}", k, text))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Candidate for one Airtable record, or `None` when it has no usable link.
pub fn build_candidate(fields: &Fields, names: &FieldNames) -> Option<JobCandidate> {
    let apply_url = normalize(&apply_url(fields, &names.apply)?)?;

    let text_of = |name: &str| field(fields, name).map(stringify).unwrap_or_default();
    let or_unknown = |s: String| if s.is_empty() { "Unknown".to_string() } else { s };

    let company_fallback = or_unknown(text_of(&names.company));
    let role_fallback = or_unknown(text_of(&names.role));
    let posted_date = field(fields, &names.date).and_then(coerce_iso_date);

    let mut payload = row_payload(fields);
    if payload.is_empty() {
        payload = format!(
            "Company: {} | Role: {} | Location: {}",
            company_fallback,
            role_fallback,
            text_of(&names.location)
        );
    }

    Some(JobCandidate {
        row_payload: payload,
        apply_url,
        company_fallback,
        role_fallback,
        posted_age: None,
        posted_date,
    })
}
