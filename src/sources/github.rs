use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use super::RevisionSource;
use crate::config::Settings;
use crate::http::{self, MAX_ATTEMPTS};
use crate::parser::diff::{added_lines_between, added_lines_from_patch};

const API_BASE: &str = "https://api.github.com";

pub struct GithubSource {
    client: reqwest::Client,
    token: Option<String>,
    owner: String,
    repo: String,
    branch: String,
    target_file: String,
}

#[derive(Deserialize)]
struct Branch {
    commit: BranchCommit,
}

#[derive(Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Deserialize)]
struct Compare {
    #[serde(default)]
    files: Vec<ChangedFile>,
}

#[derive(Deserialize)]
struct ChangedFile {
    filename: String,
    patch: Option<String>,
}

#[derive(Deserialize)]
struct Contents {
    encoding: Option<String>,
    #[serde(default)]
    content: String,
}

impl GithubSource {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: http::client(settings.request_timeout_seconds),
            token: settings.github_token.clone(),
            owner: settings.github_owner.clone(),
            repo: settings.github_repo.clone(),
            branch: settings.github_branch.clone(),
            target_file: settings.github_target_file.clone(),
        }
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}/{}", API_BASE, self.owner, self.repo, tail)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    /// File content at a commit; a file missing at that commit reads as empty.
    async fn file_at(&self, sha: &str) -> Result<String> {
        let url = self.repo_url(&format!("contents/{}", self.target_file));
        let result: Result<Contents, _> =
            http::json_with_retry("GitHub", MAX_ATTEMPTS, || self.get(&url).query(&[("ref", sha)])).await;

        let contents = match result {
            Ok(c) => c,
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => return Ok(String::new()),
            Err(e) => return Err(e.into()),
        };

        if contents.encoding.as_deref() != Some("base64") {
            bail!("Unexpected file encoding from GitHub contents API");
        }
        // the API wraps base64 at 60 columns
        let packed: String = contents.content.split_whitespace().collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(packed)
            .context("Invalid base64 in GitHub contents response")?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn added_lines_from_contents(&self, old: &str, new: &str) -> Result<Vec<String>> {
        let old_content = self.file_at(old).await?;
        let new_content = self.file_at(new).await?;
        Ok(added_lines_between(&old_content, &new_content))
    }
}

#[async_trait]
impl RevisionSource for GithubSource {
    async fn current_revision(&self) -> Result<String> {
        let url = self.repo_url(&format!("branches/{}", self.branch));
        let branch: Branch = http::json_with_retry("GitHub", MAX_ATTEMPTS, || self.get(&url))
            .await
            .context("Unable to resolve latest commit SHA from GitHub")?;
        if branch.commit.sha.is_empty() {
            return Err(anyhow!("GitHub returned an empty commit SHA for {}", self.branch));
        }
        Ok(branch.commit.sha)
    }

    async fn added_lines(&self, old: &str, new: &str) -> Result<Vec<String>> {
        let url = self.repo_url(&format!("compare/{}...{}", old, new));
        let compare: Compare = http::json_with_retry("GitHub", MAX_ATTEMPTS, || self.get(&url)).await?;

        let Some(file) = compare.files.iter().find(|f| f.filename == self.target_file) else {
            info!("Target file {} not changed between {} and {}", self.target_file, old, new);
            return Ok(Vec::new());
        };

        match file.patch.as_deref() {
            Some(patch) if !patch.is_empty() => Ok(added_lines_from_patch(patch)),
            _ => {
                warn!(
                    "Patch missing for {} in compare API, falling back to full-content diff",
                    self.target_file
                );
                self.added_lines_from_contents(old, new).await
            }
        }
    }
}
