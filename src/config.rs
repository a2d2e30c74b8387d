use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::parser::record::FieldNames;

static SHARED_VIEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://airtable\.com/(?P<base>app[a-zA-Z0-9]+)/(?P<share>shr[a-zA-Z0-9]+)/(?P<table>tbl[a-zA-Z0-9]+)")
        .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Github,
    Airtable,
    Both,
}

impl SourceType {
    pub fn uses_github(self) -> bool {
        matches!(self, SourceType::Github | SourceType::Both)
    }

    pub fn uses_airtable(self) -> bool {
        matches!(self, SourceType::Airtable | SourceType::Both)
    }
}

/// Runtime settings, read once from the environment (and `.env`) in `main`
/// and passed down by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub source_type: SourceType,

    pub github_owner: String,
    pub github_repo: String,
    pub github_branch: String,
    pub github_token: Option<String>,
    pub github_target_file: String,

    pub airtable_pat: Option<String>,
    pub airtable_base_id: Option<String>,
    pub airtable_table_id: Option<String>,
    pub airtable_view: Option<String>,
    pub airtable_shared_view_url: Option<String>,
    pub airtable_apply_field: String,
    pub airtable_company_field: String,
    pub airtable_role_field: String,
    pub airtable_location_field: String,
    pub airtable_date_field: String,

    pub openai_api_key: String,
    pub openai_model: String,

    pub discord_webhook_url: Option<String>,

    pub enable_facebook: bool,
    pub facebook_page_access_token: Option<String>,
    pub facebook_page_id: Option<String>,
    pub facebook_graph_api_version: String,
    pub facebook_send_as_dm: bool,
    pub facebook_recipient_psid: Option<String>,
    pub facebook_auto_use_captured_psid: bool,
    pub facebook_messaging_type: String,
    pub facebook_message_tag: Option<String>,
    pub facebook_webhook_verify_token: Option<String>,
    pub facebook_app_secret: Option<String>,

    pub min_notify_score: u8,
    pub database_path: String,
    pub request_timeout_seconds: u64,
    pub webhook_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_type: SourceType::Github,
            github_owner: "SimplifyJobs".into(),
            github_repo: "Summer2026-Internships".into(),
            github_branch: "dev".into(),
            github_token: None,
            github_target_file: "README.md".into(),
            airtable_pat: None,
            airtable_base_id: None,
            airtable_table_id: None,
            airtable_view: None,
            airtable_shared_view_url: None,
            airtable_apply_field: "Apply".into(),
            airtable_company_field: "Company".into(),
            airtable_role_field: "Role".into(),
            airtable_location_field: "Location".into(),
            airtable_date_field: "Date Posted".into(),
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".into(),
            discord_webhook_url: None,
            enable_facebook: false,
            facebook_page_access_token: None,
            facebook_page_id: None,
            facebook_graph_api_version: "v22.0".into(),
            facebook_send_as_dm: false,
            facebook_recipient_psid: None,
            facebook_auto_use_captured_psid: true,
            facebook_messaging_type: "RESPONSE".into(),
            facebook_message_tag: None,
            facebook_webhook_verify_token: None,
            facebook_app_secret: None,
            min_notify_score: 75,
            database_path: "data/jobs.sqlite".into(),
            request_timeout_seconds: 30,
            webhook_port: 8000,
        }
    }
}

impl Settings {
    /// Load from `.env` + process environment. Keys are matched
    /// case-insensitively against the field names (`MIN_NOTIFY_SCORE` etc.).
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let settings: Settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("Failed to read configuration from environment")?
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(settings.normalized())
    }

    /// Empty strings behave like unset values.
    fn normalized(mut self) -> Self {
        for opt in [
            &mut self.github_token,
            &mut self.airtable_pat,
            &mut self.airtable_base_id,
            &mut self.airtable_table_id,
            &mut self.airtable_view,
            &mut self.airtable_shared_view_url,
            &mut self.discord_webhook_url,
            &mut self.facebook_page_access_token,
            &mut self.facebook_page_id,
            &mut self.facebook_recipient_psid,
            &mut self.facebook_message_tag,
            &mut self.facebook_webhook_verify_token,
            &mut self.facebook_app_secret,
        ] {
            if opt.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *opt = None;
            }
        }
        self
    }

    /// Fill Airtable ids from the shared view URL and check that every
    /// identifier the enabled sources need is present. Runs before any fetch.
    pub fn validate(&mut self) -> Result<()> {
        if self.openai_api_key.trim().is_empty() {
            bail!("OPENAI_API_KEY is required");
        }
        if self.min_notify_score > 100 {
            bail!("MIN_NOTIFY_SCORE must be between 0 and 100");
        }

        if self.source_type.uses_github() && self.github_branch.trim().is_empty() {
            bail!("GITHUB_BRANCH is required when the GitHub source is enabled");
        }

        if self.source_type.uses_airtable() {
            self.resolve_airtable_identifiers();
            if self.airtable_pat.is_none() {
                bail!("AIRTABLE_PAT is required when the Airtable source is enabled");
            }
            if self.airtable_base_id.is_none() || self.airtable_table_id.is_none() {
                bail!(
                    "Airtable source requires AIRTABLE_BASE_ID and AIRTABLE_TABLE_ID, \
                     or AIRTABLE_SHARED_VIEW_URL that contains both ids"
                );
            }
        }
        Ok(())
    }

    fn resolve_airtable_identifiers(&mut self) {
        let Some(url) = self.airtable_shared_view_url.as_deref() else {
            return;
        };
        let Some((base, table)) = parse_shared_view_url(url) else {
            return;
        };
        self.airtable_base_id.get_or_insert(base);
        self.airtable_table_id.get_or_insert(table);
    }

    pub fn airtable_fields(&self) -> FieldNames {
        FieldNames {
            apply: self.airtable_apply_field.clone(),
            company: self.airtable_company_field.clone(),
            role: self.airtable_role_field.clone(),
            location: self.airtable_location_field.clone(),
            date: self.airtable_date_field.clone(),
        }
    }
}

/// (base id, table id) from `https://airtable.com/app…/shr…/tbl…`.
pub fn parse_shared_view_url(url: &str) -> Option<(String, String)> {
    let caps = SHARED_VIEW_RE.captures(url.trim())?;
    Some((caps["base"].to_string(), caps["table"].to_string()))
}
