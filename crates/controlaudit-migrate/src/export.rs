//! Exporter: legacy user subtree → snapshot directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::MigrationConfig;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::progress::create_progress_bar;
use crate::snapshot::{SnapshotManifest, SnapshotWriter};
use crate::store::{join_path, validate_segment, DocumentStore, ReadOnlyStore};

/// What an export produced.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    /// Exported legacy user.
    pub legacy_user_id: String,
    /// Snapshot directory written.
    pub directory: PathBuf,
    /// Document count per collection.
    pub collections: BTreeMap<String, usize>,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl ExportSummary {
    /// Documents across all collections.
    #[must_use]
    pub fn total_documents(&self) -> usize {
        self.collections.values().sum()
    }
}

/// Copies a legacy user's profile and first-level sub-collections to disk.
///
/// Every mapped collection gets a file even when the legacy user has no
/// documents in it.
pub struct Exporter {
    store: Arc<dyn DocumentStore>,
    config: MigrationConfig,
    show_progress: bool,
}

impl Exporter {
    /// Creates an exporter. The store is wrapped read-only.
    pub fn new(store: Arc<dyn DocumentStore>, config: MigrationConfig) -> Self {
        Self {
            store: ReadOnlyStore::shared(store),
            config,
            show_progress: false,
        }
    }

    /// Shows a terminal progress bar while reading collections.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Exports `legacy_user_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the legacy user document does not exist, in
    /// which case nothing is written to disk.
    pub async fn run(&self, legacy_user_id: &str) -> Result<ExportSummary> {
        let start = Instant::now();
        validate_segment(legacy_user_id, "legacy user id")?;

        let user_path = self.config.legacy_user_path(legacy_user_id);
        info!("Exporting {} from {}", legacy_user_id, user_path);

        let profile = self
            .store
            .get_document(&user_path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("legacy user {user_path}")))?;

        let discovered = self.store.list_collection_ids(&user_path).await?;
        info!("Found {} sub-collections", discovered.len());
        // Mapped collections are always written, as `[]` when absent.
        let collection_ids: BTreeSet<String> = discovered
            .into_iter()
            .chain(self.config.mapping.collections.iter().map(|c| c.legacy.clone()))
            .collect();

        let progress = create_progress_bar(collection_ids.len() as u64, self.show_progress);
        let mut collections: Vec<(String, Vec<Document>)> = Vec::with_capacity(collection_ids.len());
        for name in collection_ids {
            progress.set_message(name.clone());
            let documents = self
                .store
                .list_documents(&join_path(&user_path, &name))
                .await?;
            debug!("{}: {} documents", name, documents.len());
            collections.push((name, documents));
            progress.inc(1);
        }
        progress.finish_and_clear();

        let writer = SnapshotWriter::begin(&self.config.paths.snapshot_dir, legacy_user_id)?;
        writer.write_profile(&Document::new(legacy_user_id, profile))?;

        let mut counts = BTreeMap::new();
        for (name, documents) in &collections {
            writer.write_collection(name, documents)?;
            counts.insert(name.clone(), documents.len());
        }
        writer.write_manifest(&SnapshotManifest {
            legacy_user_id: legacy_user_id.to_string(),
            source_path: user_path,
            collections: counts.clone(),
        })?;
        let directory = writer.commit()?;

        let summary = ExportSummary {
            legacy_user_id: legacy_user_id.to_string(),
            directory,
            collections: counts,
            duration: start.elapsed(),
        };
        info!(
            "Export complete: {} documents in {} collections written to {} in {:.2}s",
            summary.total_documents(),
            summary.collections.len(),
            summary.directory.display(),
            summary.duration.as_secs_f64()
        );
        Ok(summary)
    }
}
