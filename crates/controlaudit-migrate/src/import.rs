//! Importer: snapshot → owner-centric documents.
//!
//! Each mapped collection file is read, every row mapped through the
//! [`Transformer`] and written under `{owner_root}/{ownerId}/{collection}`.
//! A failed entity is recorded and the run carries on; the caller decides
//! what to do with a report that has failures.

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{MigrationConfig, WriteMode};
use crate::document::{Document, Fields, Timestamp};
use crate::error::{Error, Result};
use crate::progress::create_progress_bar;
use crate::snapshot::Snapshot;
use crate::store::{is_within, join_path, validate_segment, DocumentStore};
use crate::transform::Transformer;

/// Collection label used for failures on the owner root document.
pub const OWNER_ROOT_LABEL: &str = "(owner)";

/// A single entity that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    /// Legacy collection.
    pub collection: String,
    /// Destination path, or the snapshot row when no id could be resolved.
    pub path: String,
    /// Cause.
    pub error: String,
}

/// Per-collection import counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionOutcome {
    /// Legacy collection.
    pub legacy: String,
    /// Owner collection.
    pub owner: String,
    /// Whether the snapshot had a file for it.
    pub file_present: bool,
    /// Rows read from the snapshot.
    pub read: usize,
    /// Documents written (or that would be, on a dry run).
    pub written: usize,
    /// Documents left untouched because they already existed.
    pub skipped: usize,
    /// Rows or writes that failed.
    pub failed: usize,
}

/// Result of one import run.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Source legacy user.
    pub legacy_user_id: String,
    /// Destination owner.
    pub owner_id: String,
    /// Destination owner document path.
    pub owner_path: String,
    /// Snapshot directory read.
    pub snapshot_dir: PathBuf,
    /// False when the snapshot directory was missing.
    pub snapshot_found: bool,
    /// Nothing was written.
    pub dry_run: bool,
    /// The owner root document was created by this run.
    pub owner_created: bool,
    /// One entry per mapped collection, in mapping order.
    pub collections: Vec<CollectionOutcome>,
    /// Snapshot collections with no mapping row.
    pub unmapped: Vec<String>,
    /// Every failure, sorted by path.
    pub failures: Vec<EntityFailure>,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl ImportReport {
    /// Documents written across all collections.
    #[must_use]
    pub fn total_written(&self) -> usize {
        self.collections.iter().map(|c| c.written).sum()
    }

    /// Documents skipped across all collections.
    #[must_use]
    pub fn total_skipped(&self) -> usize {
        self.collections.iter().map(|c| c.skipped).sum()
    }

    /// Rows read across all collections.
    #[must_use]
    pub fn total_read(&self) -> usize {
        self.collections.iter().map(|c| c.read).sum()
    }

    /// Whether any entity failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// `Ok` when every entity made it, `PartialWrite` otherwise.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.has_failures() {
            return Err(Error::PartialWrite {
                failed: self.failures.len(),
                attempted: self.total_read(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    Skipped,
}

/// Writes a legacy snapshot into the owner model.
pub struct Importer {
    store: Arc<dyn DocumentStore>,
    config: MigrationConfig,
    transformer: Transformer,
    show_progress: bool,
}

impl Importer {
    /// Creates an importer.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the configuration is invalid,
    /// including an owner root that overlaps the legacy root.
    pub fn new(store: Arc<dyn DocumentStore>, config: MigrationConfig) -> Result<Self> {
        config.validate()?;
        let transformer = Transformer::new(config.mapping.clone());
        Ok(Self {
            store,
            config,
            transformer,
            show_progress: false,
        })
    }

    /// Shows a terminal progress bar while writing.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Imports the snapshot of `legacy_user_id` into `owner_id`, which
    /// defaults to the legacy id.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid identifiers, a destination inside the
    /// legacy subtree, an unreadable snapshot directory or a failure to
    /// create the owner root document. Per-entity failures are collected
    /// in the report instead.
    pub async fn run(&self, legacy_user_id: &str, owner_id: Option<&str>) -> Result<ImportReport> {
        let start = Instant::now();
        validate_segment(legacy_user_id, "legacy user id")?;
        let owner_id = owner_id.unwrap_or(legacy_user_id);
        validate_segment(owner_id, "owner id")?;

        let legacy_path = self.config.legacy_user_path(legacy_user_id);
        let owner_path = self.config.owner_path(owner_id);
        if is_within(&owner_path, &legacy_path) {
            return Err(Error::Config(format!(
                "destination {owner_path} lies inside the legacy record {legacy_path}"
            )));
        }

        let dry_run = self.config.options.dry_run;
        let snapshot = Snapshot::new(&self.config.paths.snapshot_dir, legacy_user_id);
        let mut report = ImportReport {
            legacy_user_id: legacy_user_id.to_string(),
            owner_id: owner_id.to_string(),
            owner_path: owner_path.clone(),
            snapshot_dir: snapshot.dir().to_path_buf(),
            snapshot_found: snapshot.exists(),
            dry_run,
            ..ImportReport::default()
        };

        if !report.snapshot_found {
            warn!(
                "Snapshot {} does not exist, nothing to import",
                snapshot.dir().display()
            );
            report.duration = start.elapsed();
            return Ok(report);
        }

        info!(
            "Importing {} into {}{}",
            snapshot.dir().display(),
            owner_path,
            if dry_run { " (dry run)" } else { "" }
        );

        let present = snapshot.list_collections()?;
        report.unmapped = present
            .iter()
            .filter(|name| self.transformer.collection(name).is_none())
            .cloned()
            .collect();
        for name in &report.unmapped {
            warn!("Collection {} has no mapping, not imported", name);
        }

        if !dry_run {
            let root = self
                .transformer
                .owner_root_document(owner_id, Timestamp::now());
            report.owner_created = self.store.create_document(&owner_path, &root).await?;
            if report.owner_created {
                info!("Created owner document {}", owner_path);
            }
        }

        let mut failures = Vec::new();
        for mapping in &self.transformer.mapping().collections {
            let mut outcome = CollectionOutcome {
                legacy: mapping.legacy.clone(),
                owner: mapping.owner.clone(),
                file_present: present.contains(&mapping.legacy),
                ..CollectionOutcome::default()
            };

            let rows = match snapshot.read_rows(&mapping.legacy) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Cannot read {}: {}", mapping.legacy, e);
                    outcome.failed += 1;
                    failures.push(EntityFailure {
                        collection: mapping.legacy.clone(),
                        path: snapshot.collection_file(&mapping.legacy).display().to_string(),
                        error: e.to_string(),
                    });
                    report.collections.push(outcome);
                    continue;
                }
            };
            outcome.read = rows.len();

            let target = join_path(&owner_path, &mapping.owner);
            let mut planned: Vec<(String, Fields)> = Vec::with_capacity(rows.len());
            let mut seen = BTreeSet::new();
            for (index, row) in rows.iter().enumerate() {
                let decoded = Document::from_snapshot_row(row, &mapping.id_fields)
                    .and_then(|doc| validate_segment(&doc.id, "document id").map(|()| doc));
                match decoded {
                    // The first row with an id is written; later ones are failures.
                    Ok(doc) if !seen.insert(doc.id.clone()) => {
                        warn!("{}[{}]: duplicate document id '{}'", mapping.legacy, index, doc.id);
                        outcome.failed += 1;
                        failures.push(EntityFailure {
                            collection: mapping.legacy.clone(),
                            path: format!("{}[{index}]", mapping.legacy),
                            error: format!("duplicate document id '{}'", doc.id),
                        });
                    }
                    Ok(doc) => {
                        let mapped = self.transformer.transform(&doc, owner_id);
                        planned.push((join_path(&target, &mapped.id), mapped.fields));
                    }
                    Err(e) => {
                        outcome.failed += 1;
                        failures.push(EntityFailure {
                            collection: mapping.legacy.clone(),
                            path: format!("{}[{index}]", mapping.legacy),
                            error: e.to_string(),
                        });
                    }
                }
            }

            let progress = create_progress_bar(planned.len() as u64, self.show_progress);
            progress.set_message(mapping.legacy.clone());

            let results: Vec<(String, Result<WriteOutcome>)> = stream::iter(planned)
                .map(move |(path, fields)| async move {
                    let result = self.write_entity(&path, &fields).await;
                    (path, result)
                })
                .buffer_unordered(self.config.options.workers.max(1))
                .inspect(|_| progress.inc(1))
                .collect()
                .await;
            progress.finish_and_clear();

            for (path, result) in results {
                match result {
                    Ok(WriteOutcome::Written) => outcome.written += 1,
                    Ok(WriteOutcome::Skipped) => outcome.skipped += 1,
                    Err(e) => {
                        warn!("Failed to write {}: {}", path, e);
                        outcome.failed += 1;
                        failures.push(EntityFailure {
                            collection: mapping.legacy.clone(),
                            path,
                            error: e.to_string(),
                        });
                    }
                }
            }

            info!(
                "{} → {}: {} written, {} skipped, {} failed",
                outcome.legacy, outcome.owner, outcome.written, outcome.skipped, outcome.failed
            );
            report.collections.push(outcome);
        }

        if !dry_run {
            let marker = Transformer::migration_marker(legacy_user_id, failures.len());
            if let Err(e) = self.store.merge_document(&owner_path, &marker).await {
                warn!("Failed to record migration status on {}: {}", owner_path, e);
                failures.push(EntityFailure {
                    collection: OWNER_ROOT_LABEL.to_string(),
                    path: owner_path.clone(),
                    error: e.to_string(),
                });
            }
        }

        failures.sort_by(|a, b| a.path.cmp(&b.path));
        report.failures = failures;
        report.duration = start.elapsed();

        info!(
            "Import complete: {} written, {} skipped, {} failed in {:.2}s",
            report.total_written(),
            report.total_skipped(),
            report.failures.len(),
            report.duration.as_secs_f64()
        );
        Ok(report)
    }

    async fn write_entity(&self, path: &str, fields: &Fields) -> Result<WriteOutcome> {
        let options = &self.config.options;
        let outcome = match (options.write_mode, options.dry_run) {
            (WriteMode::Upsert, false) => {
                self.store.set_document(path, fields).await?;
                WriteOutcome::Written
            }
            (WriteMode::Upsert, true) => WriteOutcome::Written,
            (WriteMode::SkipExisting, false) => {
                if self.store.create_document(path, fields).await? {
                    WriteOutcome::Written
                } else {
                    WriteOutcome::Skipped
                }
            }
            (WriteMode::SkipExisting, true) => {
                if self.store.get_document(path).await?.is_some() {
                    WriteOutcome::Skipped
                } else {
                    WriteOutcome::Written
                }
            }
        };
        debug!("{}: {:?}", path, outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
#[path = "import_tests.rs"]
mod tests;
