use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

pub const MAX_ATTEMPTS: u32 = 3;
#[cfg(not(test))]
const BASE_BACKOFF_MS: u64 = 1000;
#[cfg(test)]
const BASE_BACKOFF_MS: u64 = 1;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{service} response could not be decoded: {source}")]
    Decode {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl HttpError {
    /// Timeouts, connection failures, 429 and 5xx are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpError::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            HttpError::Status { status, .. } => is_transient_status(*status),
            HttpError::Decode { .. } => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Client with a per-request timeout; shared by every outbound integration.
pub fn client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent("internship-radar")
        .build()
        .unwrap_or_default()
}

/// Send a request, retrying transient failures with exponential backoff.
/// `build` is called once per attempt. Non-2xx responses become
/// [`HttpError::Status`].
pub async fn send_with_retry<F>(
    service: &'static str,
    attempts: u32,
    build: F,
) -> Result<Response, HttpError>
where
    F: Fn() -> RequestBuilder,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        let err = match send_once(service, build()).await {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };

        attempt += 1;
        if !err.is_transient() || attempt >= attempts {
            return Err(err);
        }

        let backoff = backoff_for(attempt);
        warn!(
            "{} (attempt {}/{}), backing off {:.1}s",
            err,
            attempt,
            attempts,
            backoff.as_secs_f64()
        );
        tokio::time::sleep(backoff).await;
    }
}

/// Delay after the `attempt`-th failure: base, 2×base, 4×base, ...
fn backoff_for(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1)))
}

async fn send_once(service: &'static str, request: RequestBuilder) -> Result<Response, HttpError> {
    let resp = request
        .send()
        .await
        .map_err(|source| HttpError::Transport { service, source })?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(HttpError::Status {
        service,
        status,
        body: truncate(&body, 300),
    })
}

/// GET/POST and decode a JSON body, with retries.
pub async fn json_with_retry<T, F>(service: &'static str, attempts: u32, build: F) -> Result<T, HttpError>
where
    T: DeserializeOwned,
    F: Fn() -> RequestBuilder,
{
    let resp = send_with_retry(service, attempts, build).await?;
    resp.json::<T>()
        .await
        .map_err(|source| HttpError::Decode { service, source })
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn calls(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let c = client(5);
        let url = format!("{}/flaky", server.uri());
        let resp = send_with_retry("test", MAX_ATTEMPTS, || c.get(&url)).await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "ok");
        assert_eq!(calls(&server).await, 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such branch"))
            .mount(&server)
            .await;

        let c = client(5);
        let url = format!("{}/missing", server.uri());
        let err = send_with_retry("test", MAX_ATTEMPTS, || c.get(&url)).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.to_string().contains("no such branch"));
        assert_eq!(calls(&server).await, 1);
    }

    #[tokio::test]
    async fn retries_stop_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let c = client(5);
        let url = format!("{}/down", server.uri());
        let err = send_with_retry("test", MAX_ATTEMPTS, || c.post(&url)).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(calls(&server).await, MAX_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn undecodable_json_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let c = client(5);
        let url = format!("{}/json", server.uri());
        let result: Result<serde_json::Value, _> = json_with_retry("test", MAX_ATTEMPTS, || c.get(&url)).await;
        assert!(matches!(result, Err(HttpError::Decode { .. })));
        assert_eq!(calls(&server).await, 1);
    }

    #[test]
    fn transient_statuses() {
        let status = |code: u16| HttpError::Status {
            service: "test",
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        };
        assert!(status(429).is_transient());
        assert!(status(502).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(401).is_transient());
        assert_eq!(status(404).status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_for(1), Duration::from_millis(BASE_BACKOFF_MS));
        assert_eq!(backoff_for(2), Duration::from_millis(BASE_BACKOFF_MS * 2));
        assert_eq!(backoff_for(3), Duration::from_millis(BASE_BACKOFF_MS * 4));
    }

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
