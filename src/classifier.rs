use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::Settings;
use crate::http::{self, HttpError};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ATTEMPTS: u32 = 2;
const SYSTEM_PROMPT: &str = "You are an elite Tech Recruiter.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationPriority {
    Preferred,
    Neutral,
    NonPreferred,
}

impl LocationPriority {
    pub fn label(self) -> &'static str {
        match self {
            LocationPriority::Preferred => "Preferred (USA/Remote)",
            LocationPriority::Neutral => "Neutral (Hybrid/Unknown)",
            LocationPriority::NonPreferred => "Non-preferred (Non-USA onsite)",
        }
    }
}

/// Structured verdict for one listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobAnalysis {
    pub company: String,
    pub role: String,
    pub location: String,
    pub company_description: String,
    pub is_tech_intern: bool,
    pub prestige_score: u8,
    pub location_priority: LocationPriority,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("model returned no content")]
    Empty,
    #[error("invalid structured output from model: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, row: &str) -> Result<JobAnalysis, ClassifyError>;
}

pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: http::client(settings.request_timeout_seconds),
            api_key: settings.openai_api_key.clone(),
            model: settings.openai_model.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, row: &str) -> Result<JobAnalysis, ClassifyError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(row) },
            ],
        });

        let resp: ChatResponse = http::json_with_retry("OpenAI", ATTEMPTS, || {
            self.client
                .post(OPENAI_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ClassifyError::Empty)?;

        parse_analysis(&content)
    }
}

fn user_prompt(row: &str) -> String {
    format!(
        "Analyze this internship listing row and return strict JSON with fields: \
         company, role, location, company_description, is_tech_intern, prestige_score, \
         location_priority, reason. \
         Classification: is_tech_intern=true only for SWE, Backend, Fullstack, AI/ML, DevOps, Quant. \
         Set false for QA, Testing, PM, Marketing and other non-engineering tracks. \
         Scoring rubric: 95+ for FAANG/HFT/unicorn-level (e.g., Stripe/OpenAI), \
         85+ for strong tech firms/YC-scale startups, \
         75+ for banks or major non-tech firms with engineering programs, \
         below 70 for unknown or low relevance. \
         location_priority is one of preferred (USA or remote), neutral (hybrid or unknown), \
         non_preferred (onsite outside the USA). \
         company_description is one short sentence about what the company does. \
         Use concise reason text.\n\nRaw row:\n{}",
        row
    )
}

/// Decode and range-check the model's JSON object.
pub fn parse_analysis(content: &str) -> Result<JobAnalysis, ClassifyError> {
    let analysis: JobAnalysis =
        serde_json::from_str(content).map_err(|e| ClassifyError::Invalid(e.to_string()))?;
    if analysis.prestige_score > 100 {
        return Err(ClassifyError::Invalid(format!(
            "prestige_score {} out of range",
            analysis.prestige_score
        )));
    }
    Ok(analysis)
}
