//! Tests for service-account credentials and token exchange.

use super::*;
use std::io::Write;
use tempfile::NamedTempFile;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_PRIVATE_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/test_rsa_key.pem"
));

fn key_json(token_uri: &str) -> String {
    serde_json::json!({
        "type": "service_account",
        "project_id": "controlaudit-test",
        "private_key_id": "abc123",
        "private_key": TEST_PRIVATE_KEY,
        "client_email": "migrator@controlaudit-test.iam.gserviceaccount.com",
        "token_uri": token_uri,
    })
    .to_string()
}

#[test]
fn test_from_file_missing_is_config_error() {
    let err = ServiceAccountKey::from_file(Path::new("/nonexistent/serviceAccountKey.json"))
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_from_file_reads_key() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(key_json(DEFAULT_TOKEN_URI).as_bytes()).unwrap();

    let key = ServiceAccountKey::from_file(file.path()).unwrap();
    assert_eq!(key.project_id.as_deref(), Some("controlaudit-test"));
    assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
}

#[test]
fn test_from_json_rejects_other_key_types() {
    let json = r#"{"type":"authorized_user","private_key":"k","client_email":"a@b"}"#;
    assert!(matches!(
        ServiceAccountKey::from_json(json),
        Err(Error::Config(_))
    ));
    assert!(ServiceAccountKey::from_json("not json").is_err());
}

#[test]
fn test_debug_redacts_private_key() {
    let key = ServiceAccountKey::from_json(&key_json(DEFAULT_TOKEN_URI)).unwrap();
    let printed = format!("{key:?}");
    assert!(printed.contains("<redacted>"));
    assert!(!printed.contains("PRIVATE KEY"));
}

#[test]
fn test_signed_assertion_has_three_parts() {
    let key = ServiceAccountKey::from_json(&key_json(DEFAULT_TOKEN_URI)).unwrap();
    let auth = ServiceAccountAuth::new(key, Client::new());
    let jwt = auth.signed_assertion(1_700_000_000).unwrap();
    assert_eq!(jwt.split('.').count(), 3);
}

#[tokio::test]
async fn test_token_is_fetched_once_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("jwt-bearer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.test-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let key = ServiceAccountKey::from_json(&key_json(&format!("{}/token", server.uri()))).unwrap();
    let source = TokenSource::ServiceAccount(ServiceAccountAuth::new(key, Client::new()));

    assert_eq!(source.bearer().await.unwrap(), "ya29.test-token");
    assert_eq!(source.bearer().await.unwrap(), "ya29.test-token");
}

#[tokio::test]
async fn test_rejected_exchange_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(r#"{"error":"invalid_grant","error_description":"bad"}"#),
        )
        .mount(&server)
        .await;

    let key = ServiceAccountKey::from_json(&key_json(&format!("{}/token", server.uri()))).unwrap();
    let auth = ServiceAccountAuth::new(key, Client::new());

    assert!(matches!(auth.token().await, Err(Error::Authentication(_))));
}

#[tokio::test]
async fn test_static_source() {
    assert_eq!(
        TokenSource::Static("owner".to_string())
            .bearer()
            .await
            .unwrap(),
        "owner"
    );
}
