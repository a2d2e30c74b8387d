use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::info;

use crate::classifier::JobAnalysis;
use crate::config::Settings;
use crate::http::{self, MAX_ATTEMPTS};

const FIELD_LIMIT: usize = 1024;

/// Whether a channel will actually call out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Live,
    /// Configured but not deliverable (e.g. missing credentials); logs only
    /// and never counts as a delivery.
    Stub { reason: String },
    Disabled,
}

/// One qualifying listing to announce.
#[derive(Debug, Clone, Copy)]
pub struct Notice<'a> {
    pub job: &'a JobAnalysis,
    pub apply_url: &'a str,
    pub posted_age: Option<&'a str>,
    pub posted_date: Option<NaiveDate>,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    fn status(&self) -> ChannelStatus;
    async fn send(&self, notice: &Notice<'_>) -> Result<()>;
}

/// Channels in the order they are attempted.
pub fn channels_from_settings(settings: &Settings) -> Vec<Box<dyn Channel>> {
    vec![
        Box::new(DiscordChannel::new(settings)),
        Box::new(FacebookChannel::new(settings)),
    ]
}

// ── Discord ──

pub struct DiscordChannel {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl DiscordChannel {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: http::client(settings.request_timeout_seconds),
            webhook_url: settings.discord_webhook_url.clone(),
        }
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn status(&self) -> ChannelStatus {
        match self.webhook_url {
            Some(_) => ChannelStatus::Live,
            None => ChannelStatus::Disabled,
        }
    }

    async fn send(&self, notice: &Notice<'_>) -> Result<()> {
        let Some(url) = self.webhook_url.as_deref() else {
            anyhow::bail!("Discord webhook url is not configured");
        };
        let payload = discord_payload(notice);
        http::send_with_retry("Discord", MAX_ATTEMPTS, || self.client.post(url).json(&payload)).await?;
        Ok(())
    }
}

fn discord_payload(n: &Notice<'_>) -> Value {
    let job = n.job;
    let field = |name: &str, value: &str, inline: bool| {
        json!({ "name": name, "value": clip(value), "inline": inline })
    };

    let mut fields = vec![
        field("Company", &job.company, true),
        field("Role", &job.role, true),
        field("Location", non_empty_or(&job.location, "Unknown"), true),
        field("Location Fit", job.location_priority.label(), true),
        field(
            "Score",
            &format!("{} ({})", job.prestige_score, score_badge(job.prestige_score)),
            true,
        ),
    ];
    if let Some(posted) = posted_label(n.posted_age, n.posted_date) {
        fields.push(field("Posted", &posted, true));
    }
    fields.push(field("Company Description", non_empty_or(&job.company_description, "-"), false));
    fields.push(field("Why This Match", non_empty_or(&job.reason, "-"), false));
    fields.push(field("Apply", &format!("[Open application]({})", n.apply_url), false));

    json!({
        "embeds": [{
            "title": clip_to(&format!("{} - {}", job.company, job.role), 256),
            "url": n.apply_url,
            "description": "High-quality tech internship match detected.",
            "color": discord_color(job.prestige_score),
            "fields": fields,
        }]
    })
}

fn discord_color(score: u8) -> u32 {
    if score > 85 {
        0x2ECC71
    } else if score > 75 {
        0xF1C40F
    } else {
        0x95A5A6
    }
}

pub fn score_badge(score: u8) -> &'static str {
    match score {
        95.. => "Elite",
        85..=94 => "Strong",
        75..=84 => "Good",
        _ => "Low",
    }
}

fn posted_label(age: Option<&str>, date: Option<NaiveDate>) -> Option<String> {
    match (age, date) {
        (Some(a), Some(d)) => Some(format!("{} ago (~{})", a, d)),
        (Some(a), None) => Some(format!("{} ago", a)),
        (None, Some(d)) => Some(d.to_string()),
        (None, None) => None,
    }
}

fn non_empty_or<'a>(s: &'a str, fallback: &'a str) -> &'a str {
    if s.trim().is_empty() {
        fallback
    } else {
        s
    }
}

fn clip(s: &str) -> String {
    clip_to(s, FIELD_LIMIT)
}

fn clip_to(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── Facebook ──

enum FacebookTarget {
    /// Messenger Send API to one PSID.
    Message { recipient: String },
    /// Post on the page feed.
    Feed,
}

pub struct FacebookChannel {
    client: reqwest::Client,
    status: ChannelStatus,
    target: Option<FacebookTarget>,
    token: String,
    page_id: String,
    api_version: String,
    messaging_type: String,
    message_tag: Option<String>,
}

impl FacebookChannel {
    pub fn new(settings: &Settings) -> Self {
        let token = settings.facebook_page_access_token.clone().unwrap_or_default();
        let page_id = settings.facebook_page_id.clone().unwrap_or_default();

        let (status, target) = if !settings.enable_facebook {
            (ChannelStatus::Disabled, None)
        } else if token.is_empty() || page_id.is_empty() {
            (
                ChannelStatus::Stub {
                    reason: "page access token or page id missing".into(),
                },
                None,
            )
        } else if settings.facebook_send_as_dm {
            match settings.facebook_recipient_psid.clone() {
                Some(recipient) => (ChannelStatus::Live, Some(FacebookTarget::Message { recipient })),
                None => (
                    ChannelStatus::Stub {
                        reason: "no recipient PSID configured or captured yet".into(),
                    },
                    None,
                ),
            }
        } else {
            (ChannelStatus::Live, Some(FacebookTarget::Feed))
        };

        Self {
            client: http::client(settings.request_timeout_seconds),
            status,
            target,
            token,
            page_id,
            api_version: settings.facebook_graph_api_version.clone(),
            messaging_type: settings.facebook_messaging_type.clone(),
            message_tag: settings.facebook_message_tag.clone(),
        }
    }

    fn endpoint(&self, edge: &str) -> String {
        format!(
            "https://graph.facebook.com/{}/{}/{}",
            self.api_version, self.page_id, edge
        )
    }
}

#[async_trait]
impl Channel for FacebookChannel {
    fn name(&self) -> &'static str {
        "facebook"
    }

    fn status(&self) -> ChannelStatus {
        self.status.clone()
    }

    async fn send(&self, notice: &Notice<'_>) -> Result<()> {
        let text = facebook_text(notice);
        match &self.target {
            Some(FacebookTarget::Message { recipient }) => {
                let mut body = json!({
                    "recipient": { "id": recipient },
                    "messaging_type": self.messaging_type,
                    "message": { "text": text },
                });
                if let Some(tag) = &self.message_tag {
                    body["tag"] = json!(tag);
                }
                let url = self.endpoint("messages");
                http::send_with_retry("Facebook", MAX_ATTEMPTS, || {
                    self.client
                        .post(&url)
                        .query(&[("access_token", &self.token)])
                        .json(&body)
                })
                .await?;
            }
            Some(FacebookTarget::Feed) => {
                let body = json!({ "message": text, "link": notice.apply_url });
                let url = self.endpoint("feed");
                http::send_with_retry("Facebook", MAX_ATTEMPTS, || {
                    self.client
                        .post(&url)
                        .query(&[("access_token", &self.token)])
                        .json(&body)
                })
                .await?;
            }
            None => anyhow::bail!("Facebook channel is not live"),
        }
        info!("Facebook notification sent for {}", notice.job.company);
        Ok(())
    }
}

fn facebook_text(n: &Notice<'_>) -> String {
    let job = n.job;
    let mut lines = vec![
        format!("{} - {}", job.company, job.role),
        format!(
            "Score: {} ({}) | {}",
            job.prestige_score,
            score_badge(job.prestige_score),
            non_empty_or(&job.location, "Unknown")
        ),
    ];
    if let Some(posted) = posted_label(n.posted_age, n.posted_date) {
        lines.push(format!("Posted: {}", posted));
    }
    if !job.reason.trim().is_empty() {
        lines.push(job.reason.clone());
    }
    lines.push(format!("Apply: {}", n.apply_url));
    lines.join("\n")
}
