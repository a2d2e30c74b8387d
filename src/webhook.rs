//! Messenger webhook: answers the subscription handshake and records the
//! PSID of whoever messages the page, so DM notifications have a recipient.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::db;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

struct AppState {
    conn: Mutex<Connection>,
    verify_token: Option<String>,
    app_secret: Option<String>,
}

pub fn router(conn: Connection, verify_token: Option<String>, app_secret: Option<String>) -> Router {
    let state = Arc::new(AppState {
        conn: Mutex::new(conn),
        verify_token,
        app_secret,
    });
    Router::new()
        .route("/health", get(health))
        .route("/webhook", get(verify).post(receive))
        .with_state(state)
}

pub async fn serve(app: Router, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Webhook server listening on {}", addr);
    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge", default)]
    challenge: String,
}

fn reject(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

async fn verify(State(state): State<Arc<AppState>>, Query(params): Query<VerifyParams>) -> Response {
    if params.mode.as_deref() != Some("subscribe") {
        return reject(StatusCode::BAD_REQUEST, "Invalid hub.mode");
    }
    let Some(expected) = state.verify_token.as_deref() else {
        return reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "FACEBOOK_WEBHOOK_VERIFY_TOKEN is not configured",
        );
    };
    if params.verify_token.as_deref() != Some(expected) {
        return reject(StatusCode::FORBIDDEN, "Verify token mismatch");
    }
    info!("Webhook verification completed");
    (StatusCode::OK, params.challenge).into_response()
}

async fn receive(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(secret) = state.app_secret.as_deref() {
        let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if !signature_matches(secret, header, &body) {
            warn!("Rejected webhook call with missing or bad signature");
            return reject(StatusCode::FORBIDDEN, "Signature mismatch");
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return reject(StatusCode::BAD_REQUEST, &format!("Invalid JSON payload: {}", e)),
    };

    // event order, so the last write is the most recent sender
    let senders = sender_ids(&payload);
    if !senders.is_empty() {
        let conn = state.conn.lock().await;
        for psid in &senders {
            if let Err(e) = db::set_state(&conn, db::FACEBOOK_RECIPIENT_PSID, psid) {
                error!("Failed to store PSID: {:#}", e);
                return reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store PSID");
            }
        }
    }

    let psids: Vec<String> = senders.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    if !psids.is_empty() {
        info!("Captured PSID(s): {}", psids.join(", "));
    }
    Json(json!({ "ok": true, "captured_psids": psids })).into_response()
}

/// Checks `sha256=<hex>` against HMAC-SHA256 of the raw body, in constant time.
pub fn signature_matches(secret: &str, header: Option<&str>, body: &[u8]) -> bool {
    let Some(hex_sig) = header.and_then(|h| h.strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(received) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&received).is_ok()
}

/// Sender ids from `entry[].messaging[]` and `entry[].standby[]` events, in
/// event order (duplicates kept).
pub fn sender_ids(payload: &Value) -> Vec<String> {
    let mut ids = Vec::new();
    let entries = payload.get("entry").and_then(Value::as_array);
    for entry in entries.into_iter().flatten() {
        for key in ["messaging", "standby"] {
            let events = entry.get(key).and_then(Value::as_array);
            for event in events.into_iter().flatten() {
                let id = match event.pointer("/sender/id") {
                    Some(Value::String(s)) => s.trim().to_string(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => continue,
                };
                if !id.is_empty() {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_accepted() {
        let body = br#"{"object":"page"}"#;
        let header = sign("app-secret", body);
        assert!(signature_matches("app-secret", Some(&header), body));
    }

    #[test]
    fn bad_signatures_rejected() {
        let body = br#"{"object":"page"}"#;
        let header = sign("other-secret", body);
        assert!(!signature_matches("app-secret", Some(&header), body));
        assert!(!signature_matches("app-secret", None, body));
        assert!(!signature_matches("app-secret", Some("sha1=abcd"), body));
        assert!(!signature_matches("app-secret", Some("sha256=not-hex"), body));
    }

    #[test]
    fn sender_ids_from_messaging_and_standby() {
        let payload = json!({
            "object": "page",
            "entry": [
                {"messaging": [{"sender": {"id": "222"}}, {"sender": {"id": "111"}}]},
                {"standby": [{"sender": {"id": 333}}, {"sender": {"id": "222"}}]},
                {"messaging": [{"recipient": {"id": "page"}}, "junk", {"sender": {"id": "  "}}]}
            ]
        });
        assert_eq!(sender_ids(&payload), vec!["222", "111", "333", "222"]);
    }

    fn state(app_secret: Option<&str>) -> Arc<AppState> {
        Arc::new(AppState {
            conn: Mutex::new(db::test_conn()),
            verify_token: Some("verify-me".into()),
            app_secret: app_secret.map(String::from),
        })
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn stores_most_recent_sender_and_returns_sorted_ids() {
        let st = state(None);
        let body = json!({
            "entry": [
                {"messaging": [{"sender": {"id": "900"}}]},
                {"messaging": [{"sender": {"id": "100"}}]}
            ]
        })
        .to_string();

        let resp = receive(State(st.clone()), HeaderMap::new(), Bytes::from(body)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["captured_psids"], json!(["100", "900"]));

        let conn = st.conn.lock().await;
        let stored = db::get_state(&conn, db::FACEBOOK_RECIPIENT_PSID).unwrap();
        assert_eq!(stored.as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn unsigned_post_rejected_when_secret_set() {
        let st = state(Some("app-secret"));
        let body = br#"{"entry":[{"messaging":[{"sender":{"id":"1"}}]}]}"#;

        let resp = receive(State(st.clone()), HeaderMap::new(), Bytes::from_static(body)).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sign("app-secret", body).parse().unwrap());
        let resp = receive(State(st.clone()), headers, Bytes::from_static(body)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn verify_handshake() {
        let params = |mode: &str, token: &str| VerifyParams {
            mode: Some(mode.into()),
            verify_token: Some(token.into()),
            challenge: "1158201444".into(),
        };
        let status = |p: VerifyParams| async move { verify(State(state(None)), Query(p)).await.status() };
        assert_eq!(status(params("subscribe", "verify-me")).await, StatusCode::OK);
        assert_eq!(status(params("subscribe", "wrong")).await, StatusCode::FORBIDDEN);
        assert_eq!(status(params("unsubscribe", "verify-me")).await, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn payload_without_entries() {
        assert!(sender_ids(&json!({"object": "page"})).is_empty());
        assert!(sender_ids(&json!({"entry": {"messaging": []}})).is_empty());
    }
}
