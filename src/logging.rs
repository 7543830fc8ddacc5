//! Tracing setup, HTTP request summaries and audit scrubbing
//!
//! Everything here writes to stderr: stdout carries protocol frames when the
//! stdio transport is active.

use std::{io::IsTerminal, time::Instant};

use axum::{extract::Request, middleware::Next, response::Response};
use serde_json::Value;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::http::MCP_SESSION_ID;

const REDACTED: &str = "[REDACTED]";
const MAX_AUDIT_STRING: usize = 256;

/// Key fragments whose values never reach the audit log.
const SENSITIVE_FRAGMENTS: [&str; 5] = ["token", "secret", "password", "credential", "cookie"];

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = std::io::stderr();
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(stderr.is_terminal())
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let session_id = request
        .headers()
        .get(MCP_SESSION_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let duration_ms = started_at.elapsed().as_millis();

    // Health checks arrive constantly; keep them out of the info stream.
    if path == "/health" {
        debug!(method = %method, path = %path, status, duration_ms, "request summary");
    } else if response.status().is_server_error() {
        warn!(method = %method, path = %path, session_id = %session_id, status, duration_ms, "request failed");
    } else {
        info!(method = %method, path = %path, session_id = %session_id, status, duration_ms, "request summary");
    }

    response
}

/// Renders request params for the audit line with credentials masked and
/// long strings clipped.
pub fn audit_params(params: Option<&Value>) -> String {
    let Some(params) = params else {
        return "null".to_string();
    };
    let mut scrubbed = params.clone();
    scrub(&mut scrubbed);
    scrubbed.to_string()
}

fn scrub(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if is_credential_key(key) {
                    *item = Value::String(REDACTED.to_string());
                } else {
                    scrub(item);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(scrub),
        Value::String(text) => clip(text),
        _ => {}
    }
}

fn clip(text: &mut String) {
    if let Some((cut, _)) = text.char_indices().nth(MAX_AUDIT_STRING) {
        let dropped = text[cut..].chars().count();
        text.truncate(cut);
        text.push_str(&format!("...(+{dropped} chars)"));
    }
}

fn is_credential_key(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();
    let compact: String = key.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    matches!(compact.as_str(), "authorization" | "bearer" | "apikey" | "auth")
        || SENSITIVE_FRAGMENTS
            .iter()
            .any(|fragment| key.contains(fragment))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::StatusCode, middleware::from_fn, routing::get, Router};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn audit_params_masks_credentials_at_any_depth() {
        let params = json!({
            "name": "getDrinkInfo",
            "arguments": {
                "name": "Latte",
                "access_token": "hidden",
                "API-Key": "hidden",
                "nested": [{"client_secret": "hidden", "size": "large"}]
            }
        });

        let rendered: Value =
            serde_json::from_str(&audit_params(Some(&params))).expect("audit json");

        assert_eq!(rendered["name"], "getDrinkInfo");
        assert_eq!(rendered["arguments"]["name"], "Latte");
        assert_eq!(rendered["arguments"]["access_token"], REDACTED);
        assert_eq!(rendered["arguments"]["API-Key"], REDACTED);
        assert_eq!(rendered["arguments"]["nested"][0]["client_secret"], REDACTED);
        assert_eq!(rendered["arguments"]["nested"][0]["size"], "large");
        assert!(!audit_params(Some(&params)).contains("hidden"));
    }

    #[test]
    fn audit_params_clips_long_strings() {
        let long = "é".repeat(MAX_AUDIT_STRING + 10);
        let rendered: Value = serde_json::from_str(&audit_params(Some(&json!({"note": long}))))
            .expect("audit json");

        let note = rendered["note"].as_str().expect("string");
        assert!(note.starts_with(&"é".repeat(MAX_AUDIT_STRING)));
        assert!(note.ends_with("...(+10 chars)"));
    }

    #[test]
    fn missing_params_render_as_null() {
        assert_eq!(audit_params(None), "null");
    }

    #[test]
    fn ordinary_keys_are_not_credentials() {
        assert!(!is_credential_key("name"));
        assert!(!is_credential_key("uri"));
        assert!(is_credential_key(" Authorization "));
        assert!(is_credential_key("api_key"));
    }

    #[tokio::test]
    async fn middleware_passes_response_through() {
        let app = Router::new()
            .route("/boom", get(|| async { StatusCode::BAD_GATEWAY }))
            .layer(from_fn(request_logging_middleware));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/boom")
                    .header("mcp-session-id", "session_log")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
