//! JSON-over-HTTP plumbing shared by the vendor backends

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result, TransientError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_ERROR_BODY: usize = 2_000;

pub fn build_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("Failed to build HTTP client")
}

/// POST `body` as JSON and return the decoded object.
///
/// Non-2xx statuses, non-JSON bodies and bodies that are not a JSON object
/// (for example a bare string echoed back by a gateway) are transient errors.
/// A body that cannot be encoded is a local error and is not retried.
pub async fn post_json<B>(client: &Client, url: &str, api_key: &str, body: &B) -> Result<Value>
where
    B: Serialize + ?Sized,
{
    let payload = serde_json::to_vec(body)
        .map_err(|e| Error::input(format!("failed to encode request body: {}", e)))?;

    let mut builder = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .body(payload);
    if !api_key.is_empty() {
        builder = builder.bearer_auth(api_key);
    }

    let response = builder.send().await.map_err(TransientError::from)?;
    let status = response.status();
    let text = response.text().await.map_err(TransientError::from)?;

    if !status.is_success() {
        return Err(TransientError::Status {
            status: status.as_u16(),
            body: truncate(&text),
        }
        .into());
    }

    debug!("Raw API response: {}", text);

    let value: Value = serde_json::from_str(&text).map_err(|e| {
        TransientError::unexpected(format!("response is not JSON ({}): {}", e, truncate(&text)))
    })?;

    match value {
        Value::Object(_) => Ok(value),
        Value::String(s) => Err(TransientError::unexpected(format!(
            "API returned a string instead of structured data: {}",
            truncate(&s)
        ))
        .into()),
        other => Err(TransientError::unexpected(format!(
            "expected a JSON object, got: {}",
            truncate(&other.to_string())
        ))
        .into()),
    }
}

/// Decode a JSON object into a wire type; mismatches are transient
pub fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| TransientError::unexpected(format!("malformed {} response: {}", what, e)).into())
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_ERROR_BODY {
        return s.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_post_json_sends_bearer_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("authorization", "Bearer k"))
            .and(body_json(serde_json::json!({"a": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let value = post_json(
            &build_client(),
            &format!("{}/echo", server.uri()),
            "k",
            &serde_json::json!({"a": 1}),
        )
        .await
        .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_non_success_status_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = post_json(&build_client(), &server.uri(), "k", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        match err {
            Error::Transient(TransientError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_string_body_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!("busy")))
            .mount(&server)
            .await;

        let err = post_json(&build_client(), &server.uri(), "", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient(TransientError::UnexpectedResponse(_))));
        assert!(err.to_string().contains("string instead of structured data"));
    }

    #[tokio::test]
    async fn test_html_body_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let err = post_json(&build_client(), &server.uri(), "k", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_ERROR_BODY);
        let out = truncate(&long);
        assert!(out.ends_with("..."));
        assert!(out.len() <= MAX_ERROR_BODY + 3);
    }
}
