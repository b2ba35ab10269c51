//! HTTP plumbing shared by the REST-backed store and the token exchange.

use reqwest::Client;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default HTTP timeout for database calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default backoff hint when the server rate-limits without `Retry-After`.
pub const DEFAULT_RATE_LIMIT_SECS: u64 = 30;

/// Creates a configured HTTP client with timeout.
#[must_use]
pub fn create_http_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Validates an endpoint URL (only http and https are accepted).
pub fn validate_url(url: &str) -> Result<()> {
    let valid_schemes = ["http://", "https://"];
    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(Error::Config(format!(
            "Invalid URL scheme in '{url}'. Allowed: http, https"
        )));
    }
    if url.len() < 10 {
        return Err(Error::Config(format!("Invalid URL format: {url}")));
    }
    Ok(())
}

/// Maps a non-success HTTP response to an error.
pub fn handle_http_error(status_code: u16, body: &str, context: &str) -> Error {
    match status_code {
        429 => Error::RateLimit(DEFAULT_RATE_LIMIT_SECS),
        401 | 403 => Error::Authentication(format!("{context}: {}", summarize(body))),
        _ => Error::Api {
            status: status_code,
            message: format!("{context}: {}", summarize(body)),
        },
    }
}

/// Pulls the `error.message` out of a Google API error body when present.
fn summarize(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().chars().take(500).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_http_error_rate_limit() {
        let err = handle_http_error(429, "too many requests", "list empresas");
        assert!(matches!(err, Error::RateLimit(DEFAULT_RATE_LIMIT_SECS)));
    }

    #[test]
    fn test_handle_http_error_auth() {
        let err = handle_http_error(401, "unauthorized", "get users/u1");
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn test_handle_http_error_extracts_google_message() {
        let body = r#"{"error":{"code":400,"message":"Invalid document path","status":"INVALID_ARGUMENT"}}"#;
        match handle_http_error(400, body, "set owners/o1") {
            Error::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "set owners/o1: Invalid document path");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("http://localhost:8080").is_ok());
        assert!(validate_url("https://firestore.googleapis.com").is_ok());
        assert!(validate_url("ftp://files.example.com").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }
}
