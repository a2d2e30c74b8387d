// Mock sources, classifier and channels for pipeline tests.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::classifier::{Classifier, ClassifyError, JobAnalysis, LocationPriority};
use crate::notify::{Channel, ChannelStatus, Notice};
use crate::parser::record::{FieldValue, Fields};
use crate::sources::{RecordSource, RevisionSource};

/// One Simplify-style table row split across lines the way a diff shows it.
pub const ROW_LINES: &[&str] = &[
    "<tr>",
    r#"<td><strong><a href="https://simplify.jobs/c/Acme">Acme</a></strong></td><td>Software Engineer Intern</td><td>NYC</td>"#,
    r#"<td><a href="https://acme.com/jobs/1?utm_source=Simplify"><img src="https://i.imgur.com/x.png" alt="Apply"></a></td><td>3d</td>"#,
    "</tr>",
];

pub fn analysis(tech: bool, score: u8) -> JobAnalysis {
    JobAnalysis {
        company: "Acme".into(),
        role: "SWE Intern".into(),
        location: "NYC".into(),
        company_description: "Rockets.".into(),
        is_tech_intern: tech,
        prestige_score: score,
        location_priority: LocationPriority::Preferred,
        reason: "Strong".into(),
    }
}

pub fn record(company: &str, url: &str) -> Fields {
    vec![
        ("Company".into(), FieldValue::Text(company.into())),
        ("Apply".into(), FieldValue::Text(url.into())),
    ]
}

// =============================================================================
// Classifier
// =============================================================================

pub struct StubClassifier {
    verdict: Option<JobAnalysis>,
    calls: Mutex<usize>,
}

impl StubClassifier {
    pub fn ok(a: JobAnalysis) -> Self {
        Self { verdict: Some(a), calls: Mutex::new(0) }
    }

    pub fn failing() -> Self {
        Self { verdict: None, calls: Mutex::new(0) }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(&self, _row: &str) -> Result<JobAnalysis, ClassifyError> {
        *self.calls.lock().unwrap() += 1;
        self.verdict
            .clone()
            .ok_or_else(|| ClassifyError::Invalid("missing field `reason`".into()))
    }
}

// =============================================================================
// Channels
// =============================================================================

pub struct MockChannel {
    name: &'static str,
    status: ChannelStatus,
    fail: bool,
    sent: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn live(name: &'static str, fail: bool) -> Box<dyn Channel> {
        Box::new(Self { name, status: ChannelStatus::Live, fail, sent: Mutex::new(Vec::new()) })
    }

    pub fn with_status(name: &'static str, status: ChannelStatus) -> Box<dyn Channel> {
        Box::new(Self { name, status, fail: false, sent: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    fn status(&self) -> ChannelStatus {
        self.status.clone()
    }

    async fn send(&self, notice: &Notice<'_>) -> Result<()> {
        self.sent.lock().unwrap().push(notice.apply_url.to_string());
        if self.fail {
            anyhow::bail!("{} is down", self.name);
        }
        Ok(())
    }
}

// =============================================================================
// Sources
// =============================================================================

pub struct MockRevision {
    pub current: String,
    pub lines: Vec<String>,
    pub fail_current: bool,
    diff_calls: Mutex<Vec<(String, String)>>,
}

impl MockRevision {
    pub fn new(current: &str, lines: &[&str]) -> Self {
        Self {
            current: current.into(),
            lines: lines.iter().map(|s| s.to_string()).collect(),
            fail_current: false,
            diff_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn diff_calls(&self) -> Vec<(String, String)> {
        self.diff_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RevisionSource for MockRevision {
    async fn current_revision(&self) -> Result<String> {
        if self.fail_current {
            anyhow::bail!("GitHub returned 503");
        }
        Ok(self.current.clone())
    }

    async fn added_lines(&self, old: &str, new: &str) -> Result<Vec<String>> {
        self.diff_calls.lock().unwrap().push((old.to_string(), new.to_string()));
        Ok(self.lines.clone())
    }
}

/// `None` fails every listing call.
pub struct MockRecords(pub Option<Vec<Fields>>);

#[async_trait]
impl RecordSource for MockRecords {
    async fn list_records(&self) -> Result<Vec<Fields>> {
        self.0.clone().ok_or_else(|| anyhow!("Airtable returned 401"))
    }
}
