//! Error types for the migration toolkit.
//!
//! Codes follow the pattern `MIG-XXX` so operator logs can be grepped and
//! matched against the runbook.

use thiserror::Error;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while exporting, importing or inspecting.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid credentials, arguments or configuration (MIG-001).
    #[error("[MIG-001] Configuration error: {0}")]
    Config(String),

    /// Referenced record does not exist (MIG-002).
    #[error("[MIG-002] Not found: {0}")]
    NotFound(String),

    /// Credential exchange or authorization failed (MIG-003).
    #[error("[MIG-003] Authentication failed: {0}")]
    Authentication(String),

    /// Database answered with a non-success status (MIG-004).
    #[error("[MIG-004] Database error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or summary.
        message: String,
    },

    /// Database asked us to slow down (MIG-005).
    #[error("[MIG-005] Rate limited, retry after {0}s")]
    RateLimit(u64),

    /// Network-level failure talking to the database (MIG-006).
    #[error("[MIG-006] Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Snapshot directory or file is unusable (MIG-007).
    #[error("[MIG-007] Snapshot error: {0}")]
    Snapshot(String),

    /// A document could not be decoded or identified (MIG-008).
    #[error("[MIG-008] Invalid document: {0}")]
    InvalidDocument(String),

    /// A write was attempted through a read-only handle (MIG-009).
    #[error("[MIG-009] Write rejected on read-only store: {0}")]
    ReadOnly(String),

    /// Some entity writes failed; the run completed (MIG-010).
    #[error("[MIG-010] {failed} of {attempted} entity writes failed")]
    PartialWrite {
        /// Number of failed entities.
        failed: usize,
        /// Number of entities attempted.
        attempted: usize,
    },

    /// IO error (MIG-011).
    #[error("[MIG-011] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (MIG-012).
    #[error("[MIG-012] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error (MIG-013).
    #[error("[MIG-013] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns the error code (e.g., "MIG-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "MIG-001",
            Self::NotFound(_) => "MIG-002",
            Self::Authentication(_) => "MIG-003",
            Self::Api { .. } => "MIG-004",
            Self::RateLimit(_) => "MIG-005",
            Self::Transport(_) => "MIG-006",
            Self::Snapshot(_) => "MIG-007",
            Self::InvalidDocument(_) => "MIG-008",
            Self::ReadOnly(_) => "MIG-009",
            Self::PartialWrite { .. } => "MIG-010",
            Self::Io(_) => "MIG-011",
            Self::Json(_) => "MIG-012",
            Self::Yaml(_) => "MIG-013",
        }
    }

    /// Returns true if the failed call may succeed when simply repeated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
