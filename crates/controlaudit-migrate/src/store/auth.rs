//! Service-account credentials and OAuth2 access tokens.
//!
//! Admin access uses the JWT bearer grant: a claim set signed with the
//! service account's RSA key is exchanged at `token_uri` for a short-lived
//! access token, which is cached until shortly before it expires.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::common::handle_http_error;

/// OAuth2 scope granting Firestore access.
pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// Google's token endpoint.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Contents of a service-account JSON key file.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Key type, `service_account` for admin keys.
    #[serde(rename = "type", default)]
    pub key_type: String,
    /// Project the key belongs to.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Id of the signing key.
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    /// Service account email.
    pub client_email: String,
    /// Token exchange endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl ServiceAccountKey {
    /// Loads a key file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file is missing, unreadable or
    /// not a service-account key.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Config(format!(
                "credentials file '{}' not found",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "cannot read credentials file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Parses a key from its JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("invalid service-account key: {e}")))?;
        if !key.key_type.is_empty() && key.key_type != "service_account" {
            return Err(Error::Config(format!(
                "expected a service_account key, got '{}'",
                key.key_type
            )));
        }
        if key.private_key.trim().is_empty() || key.client_email.trim().is_empty() {
            return Err(Error::Config(
                "service-account key lacks private_key or client_email".to_string(),
            ));
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Exchanges a service-account key for access tokens.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    /// Creates an authenticator for a key.
    pub fn new(key: ServiceAccountKey, client: Client) -> Self {
        Self {
            key,
            client,
            cached: Mutex::new(None),
        }
    }

    /// Builds the signed JWT assertion for `now` (seconds since epoch).
    fn signed_assertion(&self, now: i64) -> Result<String> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.key.private_key_id);
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| Error::Config(format!("invalid private_key in credentials: {e}")))?;
        encode(&header, &claims, &signing_key)
            .map_err(|e| Error::Authentication(format!("cannot sign assertion: {e}")))
    }

    async fn fetch(&self) -> Result<CachedToken> {
        let assertion = self.signed_assertion(chrono::Utc::now().timestamp())?;
        debug!("Requesting access token for {}", self.key.client_email);

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(match handle_http_error(status, &body, "token exchange") {
                Error::Api { message, .. } => Error::Authentication(message),
                other => other,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Authentication(format!("malformed token response: {e}")))?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);

        Ok(CachedToken {
            token: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }

    /// Returns a valid access token, refreshing it when close to expiry.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref() {
            if Instant::now() < current.refresh_at {
                return Ok(current.token.clone());
            }
        }
        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Where request authorization comes from.
pub enum TokenSource {
    /// A fixed bearer token (emulator `owner`, or a pre-minted token).
    Static(String),
    /// Tokens minted from a service-account key.
    ServiceAccount(ServiceAccountAuth),
}

impl TokenSource {
    /// Bearer token for the next request.
    pub async fn bearer(&self) -> Result<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ServiceAccount(auth) => auth.token().await,
        }
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
