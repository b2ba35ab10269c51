//! Inspector: read-only reconciliation of a snapshot against an owner record.
//!
//! Every snapshot document is mapped with the importer's [`Transformer`]
//! and diffed field by field against the owner document with the same id.
//! Differences that are only about representation (timestamp encodings,
//! integer vs double of the same value) are not reported.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::MigrationConfig;
use crate::document::{Document, FieldValue, Fields, Timestamp};
use crate::error::Result;
use crate::snapshot::{Snapshot, MANIFEST_FILE};
use crate::store::{join_path, validate_segment, DocumentStore, ReadOnlyStore};
use crate::transform::{Transformer, APP_ID_FIELD, MIGRATION_FIELD};

/// One difference between the expected and the actual owner record.
#[derive(Debug, Clone, PartialEq)]
pub enum Discrepancy {
    /// The owner root document does not exist.
    OwnerDocumentMissing {
        /// Owner document path.
        path: String,
    },
    /// A snapshot document has no owner counterpart.
    MissingOnOwner {
        /// Legacy collection.
        collection: String,
        /// Document id.
        id: String,
    },
    /// An owner document has no snapshot counterpart.
    MissingOnLegacy {
        /// Legacy collection.
        collection: String,
        /// Document id.
        id: String,
    },
    /// A field expected from the snapshot is absent on the owner side.
    FieldMissingOnOwner {
        /// Legacy collection.
        collection: String,
        /// Document id.
        id: String,
        /// Dotted field path.
        field: String,
    },
    /// The owner document has a field the snapshot does not.
    FieldMissingOnLegacy {
        /// Legacy collection.
        collection: String,
        /// Document id.
        id: String,
        /// Dotted field path.
        field: String,
    },
    /// Both sides have the field with different values.
    ValueMismatch {
        /// Legacy collection.
        collection: String,
        /// Document id.
        id: String,
        /// Dotted field path.
        field: String,
        /// Expected value (mapped from the snapshot).
        legacy: FieldValue,
        /// Value found on the owner side.
        owner: FieldValue,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OwnerDocumentMissing { path } => write!(f, "owner document {path} is missing"),
            Self::MissingOnOwner { collection, id } => {
                write!(f, "{collection}/{id}: missing on owner")
            }
            Self::MissingOnLegacy { collection, id } => {
                write!(f, "{collection}/{id}: not in legacy snapshot")
            }
            Self::FieldMissingOnOwner {
                collection,
                id,
                field,
            } => write!(f, "{collection}/{id}: field '{field}' missing on owner"),
            Self::FieldMissingOnLegacy {
                collection,
                id,
                field,
            } => write!(f, "{collection}/{id}: field '{field}' not in legacy snapshot"),
            Self::ValueMismatch {
                collection,
                id,
                field,
                legacy,
                owner,
            } => write!(
                f,
                "{collection}/{id}: field '{field}' differs (legacy {}, owner {})",
                legacy.to_snapshot_json(),
                owner.to_snapshot_json()
            ),
        }
    }
}

/// A problem inside the snapshot itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// A declared reference points at a document absent from the snapshot.
    BrokenReference {
        /// Legacy collection holding the reference.
        collection: String,
        /// Referencing document id.
        id: String,
        /// Reference field.
        field: String,
        /// Collection the reference should resolve in.
        target: String,
        /// Referenced id.
        value: String,
    },
    /// A snapshot row cannot be decoded (no id, bad timestamp).
    InvalidRow {
        /// Legacy collection.
        collection: String,
        /// Row position in the file.
        index: usize,
        /// Cause.
        error: String,
    },
    /// Two snapshot rows share a document id.
    DuplicateId {
        /// Legacy collection.
        collection: String,
        /// Repeated id.
        id: String,
        /// Position of the repeat in the file.
        index: usize,
    },
    /// A collection file holds a different number of rows than the export
    /// manifest recorded.
    ManifestMismatch {
        /// Legacy collection.
        collection: String,
        /// Rows recorded at export time.
        exported: usize,
        /// Rows found now.
        found: usize,
    },
    /// A snapshot file could not be read.
    UnreadableCollection {
        /// Legacy collection.
        collection: String,
        /// Cause.
        error: String,
    },
}

impl IntegrityIssue {
    /// Whether the issue should stop an import.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::BrokenReference { .. } | Self::DuplicateId { .. } | Self::ManifestMismatch { .. }
        )
    }
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenReference {
                collection,
                id,
                field,
                target,
                value,
            } => write!(
                f,
                "{collection}/{id}: {field} '{value}' does not exist in {target}"
            ),
            Self::InvalidRow {
                collection,
                index,
                error,
            } => write!(f, "{collection}[{index}]: {error}"),
            Self::DuplicateId {
                collection,
                id,
                index,
            } => write!(f, "{collection}[{index}]: duplicate document id '{id}'"),
            Self::ManifestMismatch {
                collection,
                exported,
                found,
            } => write!(
                f,
                "{collection}: {found} rows in snapshot, {exported} exported"
            ),
            Self::UnreadableCollection { collection, error } => {
                write!(f, "{collection}: {error}")
            }
        }
    }
}

/// Overall state of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    /// Every snapshot document exists on the owner side.
    Ok,
    /// Some snapshot documents are missing on the owner side.
    Incomplete,
    /// The owner collection is empty while the snapshot is not.
    Empty,
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Incomplete => "incomplete",
            Self::Empty => "empty",
        })
    }
}

/// Counts and id differences for one mapped collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionComparison {
    /// Legacy collection.
    pub legacy: String,
    /// Owner collection.
    pub owner: String,
    /// Documents in the snapshot.
    pub legacy_count: usize,
    /// Documents the export manifest recorded, when there is one.
    pub exported_count: Option<usize>,
    /// Documents on the owner side.
    pub owner_count: usize,
    /// Snapshot ids absent on the owner side.
    pub missing: Vec<String>,
    /// Owner ids absent from the snapshot.
    pub extra: Vec<String>,
    /// Documents present on both sides with field differences.
    pub differing: usize,
    /// Status.
    pub status: CollectionStatus,
}

/// What the owner root document says about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerSummary {
    /// `role` field.
    pub role: Option<String>,
    /// `status` field.
    pub status: Option<String>,
    /// `appId` field.
    pub app_id: Option<String>,
    /// `migration.status` field.
    pub migration_status: Option<String>,
}

impl OwnerSummary {
    fn from_fields(fields: &Fields) -> Self {
        let text = |name: &str| fields.get(name).and_then(FieldValue::as_str).map(String::from);
        let migration_status = match fields.get(MIGRATION_FIELD) {
            Some(FieldValue::Map(marker)) => marker
                .get("status")
                .and_then(FieldValue::as_str)
                .map(String::from),
            _ => None,
        };
        Self {
            role: text("role"),
            status: text("status"),
            app_id: text(APP_ID_FIELD),
            migration_status,
        }
    }
}

/// Result of an inspection. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct DiscrepancyReport {
    /// Legacy user compared.
    pub legacy_user_id: String,
    /// Owner compared.
    pub owner_id: String,
    /// Owner document path.
    pub owner_path: String,
    /// False when the snapshot directory was missing.
    pub snapshot_found: bool,
    /// Owner root summary, `None` when the document is missing.
    pub owner: Option<OwnerSummary>,
    /// Per-collection comparison, in mapping order.
    pub collections: Vec<CollectionComparison>,
    /// Every difference found.
    pub discrepancies: Vec<Discrepancy>,
    /// Problems inside the snapshot.
    pub integrity: Vec<IntegrityIssue>,
    required: Vec<String>,
}

impl DiscrepancyReport {
    /// No discrepancies and no integrity issues.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty() && self.integrity.is_empty()
    }

    /// Human-readable reasons the import should not proceed.
    #[must_use]
    pub fn blocking_issues(&self) -> Vec<String> {
        let mut issues: Vec<String> = self
            .collections
            .iter()
            .filter(|c| self.required.contains(&c.legacy) && !c.missing.is_empty())
            .map(|c| {
                format!(
                    "{} documents of required collection {} are missing on owner",
                    c.missing.len(),
                    c.legacy
                )
            })
            .collect();
        issues.extend(
            self.integrity
                .iter()
                .filter(|i| i.is_blocking())
                .map(ToString::to_string),
        );
        issues
    }

    /// True when no blocking issue was found.
    #[must_use]
    pub fn ready_to_import(&self) -> bool {
        self.blocking_issues().is_empty()
    }
}

/// Compares snapshots with owner records without writing anything.
pub struct Inspector {
    store: Arc<dyn DocumentStore>,
    config: MigrationConfig,
    transformer: Transformer,
}

impl Inspector {
    /// Creates an inspector. The store is wrapped read-only.
    pub fn new(store: Arc<dyn DocumentStore>, config: MigrationConfig) -> Self {
        let transformer = Transformer::new(config.mapping.clone());
        Self {
            store: ReadOnlyStore::shared(store),
            config,
            transformer,
        }
    }

    /// Compares the snapshot of `legacy_user_id` with owner `owner_id`
    /// (defaulting to the legacy id).
    ///
    /// # Errors
    ///
    /// Returns an error for invalid identifiers or when the database
    /// cannot be read. A missing owner or snapshot is reported, not an error.
    pub async fn run(
        &self,
        legacy_user_id: &str,
        owner_id: Option<&str>,
    ) -> Result<DiscrepancyReport> {
        validate_segment(legacy_user_id, "legacy user id")?;
        let owner_id = owner_id.unwrap_or(legacy_user_id);
        validate_segment(owner_id, "owner id")?;

        let owner_path = self.config.owner_path(owner_id);
        let snapshot = Snapshot::new(&self.config.paths.snapshot_dir, legacy_user_id);
        info!(
            "Inspecting {} against {}",
            snapshot.dir().display(),
            owner_path
        );

        let mut report = DiscrepancyReport {
            legacy_user_id: legacy_user_id.to_string(),
            owner_id: owner_id.to_string(),
            owner_path: owner_path.clone(),
            snapshot_found: snapshot.exists(),
            required: self.transformer.mapping().required_collections.clone(),
            ..DiscrepancyReport::default()
        };
        if !report.snapshot_found {
            warn!(
                "Snapshot {} does not exist, comparing against an empty snapshot",
                snapshot.dir().display()
            );
        }

        match self.store.get_document(&owner_path).await? {
            Some(fields) => report.owner = Some(OwnerSummary::from_fields(&fields)),
            None => report.discrepancies.push(Discrepancy::OwnerDocumentMissing {
                path: owner_path.clone(),
            }),
        }

        let manifest = match snapshot.read_manifest() {
            Ok(manifest) => manifest,
            Err(e) => {
                report.integrity.push(IntegrityIssue::UnreadableCollection {
                    collection: MANIFEST_FILE.to_string(),
                    error: e.to_string(),
                });
                None
            }
        };
        let exported = |legacy: &str| {
            manifest
                .as_ref()
                .and_then(|m| m.collections.get(legacy).copied())
        };

        let mut legacy_ids: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut legacy_docs: BTreeMap<String, Vec<Document>> = BTreeMap::new();
        for mapping in &self.transformer.mapping().collections {
            let (docs, rows) = self.load_legacy(&snapshot, &mapping.legacy, &mut report.integrity);
            if let (Some(exported), Some(found)) = (exported(&mapping.legacy), rows) {
                if exported != found {
                    report.integrity.push(IntegrityIssue::ManifestMismatch {
                        collection: mapping.legacy.clone(),
                        exported,
                        found,
                    });
                }
            }
            legacy_ids.insert(
                mapping.legacy.clone(),
                docs.iter().map(|d| d.id.clone()).collect(),
            );
            legacy_docs.insert(mapping.legacy.clone(), docs);
        }

        for mapping in &self.transformer.mapping().collections {
            let legacy = legacy_docs.remove(&mapping.legacy).unwrap_or_default();
            let owner_docs = self
                .store
                .list_documents(&join_path(&owner_path, &mapping.owner))
                .await?;
            let mut comparison = self.compare_collection(
                &mapping.legacy,
                &mapping.owner,
                &legacy,
                owner_docs,
                owner_id,
                &mut report.discrepancies,
            );
            comparison.exported_count = exported(&mapping.legacy);
            debug!(
                "{}: legacy {}, owner {}, {}",
                comparison.legacy, comparison.legacy_count, comparison.owner_count, comparison.status
            );
            self.check_references(&mapping.legacy, &legacy, &legacy_ids, &mut report.integrity);
            report.collections.push(comparison);
        }

        info!(
            "Inspection complete: {} discrepancies, {} integrity issues",
            report.discrepancies.len(),
            report.integrity.len()
        );
        Ok(report)
    }

    /// Decoded documents plus the raw row count, `None` when unreadable.
    fn load_legacy(
        &self,
        snapshot: &Snapshot,
        collection: &str,
        issues: &mut Vec<IntegrityIssue>,
    ) -> (Vec<Document>, Option<usize>) {
        let rows = match snapshot.read_rows(collection) {
            Ok(rows) => rows,
            Err(e) => {
                issues.push(IntegrityIssue::UnreadableCollection {
                    collection: collection.to_string(),
                    error: e.to_string(),
                });
                return (Vec::new(), None);
            }
        };

        let id_fields = self.transformer.id_fields(collection);
        let mut docs = Vec::with_capacity(rows.len());
        let mut seen = BTreeSet::new();
        for (index, row) in rows.iter().enumerate() {
            match Document::from_snapshot_row(row, id_fields) {
                Ok(doc) if !seen.insert(doc.id.clone()) => {
                    issues.push(IntegrityIssue::DuplicateId {
                        collection: collection.to_string(),
                        id: doc.id,
                        index,
                    });
                }
                Ok(doc) => docs.push(doc),
                Err(e) => issues.push(IntegrityIssue::InvalidRow {
                    collection: collection.to_string(),
                    index,
                    error: e.to_string(),
                }),
            }
        }
        (docs, Some(rows.len()))
    }

    fn compare_collection(
        &self,
        legacy_name: &str,
        owner_name: &str,
        legacy: &[Document],
        owner_docs: Vec<Document>,
        owner_id: &str,
        out: &mut Vec<Discrepancy>,
    ) -> CollectionComparison {
        let owner_count = owner_docs.len();
        let mut owner_by_id: BTreeMap<String, Fields> =
            owner_docs.into_iter().map(|d| (d.id, d.fields)).collect();

        let mut missing = Vec::new();
        let mut differing = 0;
        let mut sorted: Vec<&Document> = legacy.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        for doc in sorted {
            let expected = self.transformer.transform(doc, owner_id);
            let Some(actual) = owner_by_id.remove(&doc.id) else {
                out.push(Discrepancy::MissingOnOwner {
                    collection: legacy_name.to_string(),
                    id: doc.id.clone(),
                });
                missing.push(doc.id.clone());
                continue;
            };

            let diffs = diff_fields(&expected.fields, &actual);
            if !diffs.is_empty() {
                differing += 1;
            }
            out.extend(diffs.into_iter().map(|diff| diff.into_discrepancy(legacy_name, &doc.id)));
        }

        let extra: Vec<String> = owner_by_id.into_keys().collect();
        for id in &extra {
            out.push(Discrepancy::MissingOnLegacy {
                collection: legacy_name.to_string(),
                id: id.clone(),
            });
        }

        let status = if missing.is_empty() {
            CollectionStatus::Ok
        } else if owner_count == 0 {
            CollectionStatus::Empty
        } else {
            CollectionStatus::Incomplete
        };

        CollectionComparison {
            legacy: legacy_name.to_string(),
            owner: owner_name.to_string(),
            legacy_count: legacy.len(),
            exported_count: None,
            owner_count,
            missing,
            extra,
            differing,
            status,
        }
    }

    fn check_references(
        &self,
        collection: &str,
        docs: &[Document],
        legacy_ids: &BTreeMap<String, BTreeSet<String>>,
        issues: &mut Vec<IntegrityIssue>,
    ) {
        for rule in self
            .transformer
            .mapping()
            .references
            .iter()
            .filter(|r| r.collection == collection)
        {
            let empty = BTreeSet::new();
            let targets = legacy_ids.get(&rule.target).unwrap_or(&empty);
            for doc in docs {
                let Some(value) = doc.get(&rule.field).and_then(reference_text) else {
                    continue;
                };
                if targets.contains(&value) {
                    continue;
                }
                issues.push(IntegrityIssue::BrokenReference {
                    collection: collection.to_string(),
                    id: doc.id.clone(),
                    field: rule.field.clone(),
                    target: rule.target.clone(),
                    value,
                });
            }
        }
    }
}

/// Text a reference value is matched against document ids with, read the
/// way snapshot row ids are. `None` for null, `false` and empty strings.
fn reference_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null | FieldValue::Boolean(false) => None,
        FieldValue::String(s) if s.is_empty() => None,
        FieldValue::String(s) => Some(s.clone()),
        FieldValue::Integer(i) => Some(i.to_string()),
        other => Some(other.to_snapshot_json().to_string()),
    }
}

/// A field-level difference found by [`diff_fields`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDiff {
    /// Only the expected side has the field.
    MissingOnOwner(String),
    /// Only the actual side has the field.
    MissingOnLegacy(String),
    /// Values differ.
    Mismatch {
        /// Dotted field path.
        field: String,
        /// Expected value.
        legacy: FieldValue,
        /// Actual value.
        owner: FieldValue,
    },
}

impl FieldDiff {
    fn into_discrepancy(self, collection: &str, id: &str) -> Discrepancy {
        let collection = collection.to_string();
        let id = id.to_string();
        match self {
            Self::MissingOnOwner(field) => Discrepancy::FieldMissingOnOwner {
                collection,
                id,
                field,
            },
            Self::MissingOnLegacy(field) => Discrepancy::FieldMissingOnLegacy {
                collection,
                id,
                field,
            },
            Self::Mismatch {
                field,
                legacy,
                owner,
            } => Discrepancy::ValueMismatch {
                collection,
                id,
                field,
                legacy,
                owner,
            },
        }
    }
}

/// Diffs two field maps. Nested maps are walked and reported with dotted
/// paths; results are ordered by path.
#[must_use]
pub fn diff_fields(legacy: &Fields, owner: &Fields) -> Vec<FieldDiff> {
    let mut out = Vec::new();
    diff_into("", legacy, owner, &mut out);
    out
}

fn diff_into(prefix: &str, legacy: &Fields, owner: &Fields, out: &mut Vec<FieldDiff>) {
    let names: BTreeSet<&String> = legacy.keys().chain(owner.keys()).collect();
    for name in names {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match (legacy.get(name), owner.get(name)) {
            (Some(a), Some(b)) => {
                let (a, b) = (normalize(a), normalize(b));
                match (&a, &b) {
                    (FieldValue::Map(x), FieldValue::Map(y)) => diff_into(&path, x, y, out),
                    _ if values_equal(&a, &b) => {}
                    _ => out.push(FieldDiff::Mismatch {
                        field: path,
                        legacy: a,
                        owner: b,
                    }),
                }
            }
            (Some(_), None) => out.push(FieldDiff::MissingOnOwner(path)),
            (None, Some(_)) => out.push(FieldDiff::MissingOnLegacy(path)),
            (None, None) => {}
        }
    }
}

/// Rewrites representation variants to one canonical form: maps shaped like
/// `{seconds, nanoseconds}` or `{_seconds, _nanoseconds}` become timestamps.
#[must_use]
pub fn normalize(value: &FieldValue) -> FieldValue {
    match value {
        FieldValue::Map(fields) => timestamp_from_map(fields).map_or_else(
            || FieldValue::Map(fields.iter().map(|(k, v)| (k.clone(), normalize(v))).collect()),
            FieldValue::Timestamp,
        ),
        FieldValue::Array(values) => FieldValue::Array(values.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

fn timestamp_from_map(fields: &Fields) -> Option<Timestamp> {
    let integer = |name: &str| match fields.get(name) {
        Some(FieldValue::Integer(i)) => Some(*i),
        _ => None,
    };
    if fields.len() != 2 {
        return None;
    }
    for (secs, nanos) in [("seconds", "nanoseconds"), ("_seconds", "_nanoseconds")] {
        if let (Some(s), Some(n)) = (integer(secs), integer(nanos)) {
            return Timestamp::new(s, u32::try_from(n).ok()?).ok();
        }
    }
    None
}

/// Equality after normalisation. An integer equals a double holding exactly
/// the same value.
#[must_use]
pub fn values_equal(a: &FieldValue, b: &FieldValue) -> bool {
    match (a, b) {
        (FieldValue::Integer(i), FieldValue::Double(d))
        | (FieldValue::Double(d), FieldValue::Integer(i)) => integral(*d) == Some(*i),
        (FieldValue::Double(x), FieldValue::Double(y)) => x == y || (x.is_nan() && y.is_nan()),
        (FieldValue::Array(x), FieldValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (FieldValue::Map(x), FieldValue::Map(y)) => diff_fields(x, y).is_empty(),
        _ => a == b,
    }
}

/// The integer a double holds exactly, if any.
fn integral(d: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    if d.fract() != 0.0 || !(-LIMIT..LIMIT).contains(&d) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some(d as i64)
}

#[cfg(test)]
#[path = "inspect_tests.rs"]
mod tests;
