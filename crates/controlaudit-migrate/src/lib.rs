// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # ControlAudit Migration Tool
//!
//! `controlaudit-migrate` moves a ControlAudit account from the legacy
//! user-centric Firestore layout (`apps/auditoria/users/{uid}/...`) to the
//! owner-centric one (`apps/auditoria/owners/{ownerId}/...`).
//!
//! ## Stages
//!
//! | Stage | Reads | Writes |
//! |-------|-------|--------|
//! | [`Exporter`] | legacy user subtree | snapshot directory |
//! | [`Importer`] | snapshot directory | owner subtree |
//! | [`Inspector`] | snapshot + owner subtree | nothing |
//!
//! Stages never call each other; the snapshot on disk and the database are
//! the only things they share. Every stage is idempotent and safe to re-run.
//!
//! ## Quick Start
//!
//! ```bash
//! export GOOGLE_APPLICATION_CREDENTIALS=./serviceAccountKey.json
//! controlaudit-migrate export --legacy-user-id hTD8FYeu...
//! controlaudit-migrate inspect --legacy-user-id hTD8FYeu...
//! controlaudit-migrate import --legacy-user-id hTD8FYeu... --dry-run
//! controlaudit-migrate import --legacy-user-id hTD8FYeu...
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! database:
//!   project_id: controlaudit
//!   credentials: ./serviceAccountKey.json
//!
//! paths:
//!   legacy_root: apps/auditoria/users
//!   owner_root: apps/auditoria/owners
//!   snapshot_dir: migracion/legacy
//!
//! options:
//!   workers: 4
//!   write_mode: upsert
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod import;
pub mod inspect;
mod progress;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod transform;

pub use config::{MigrationConfig, MigrationOptions, WriteMode};
pub use document::{Document, FieldValue, Fields, Timestamp};
pub use error::{Error, Result};
pub use export::{ExportSummary, Exporter};
pub use import::{ImportReport, Importer};
pub use inspect::{Discrepancy, DiscrepancyReport, Inspector};
pub use store::{create_store, DocumentStore, FirestoreStore, MemoryStore, ReadOnlyStore};
pub use transform::Transformer;
