//! Legacy → owner document mapping.
//!
//! Shared by the importer (to build what it writes) and the inspector (to
//! know what it should find), so both stages agree on the expected shape.

use crate::config::{CollectionMapping, MappingConfig};
use crate::document::{Document, FieldValue, Fields, Timestamp};

/// Fields stamped on every migrated document.
pub const STAMP_FIELDS: &[&str] = &[OWNER_ID_FIELD, APP_ID_FIELD, MIGRATED_FROM_FIELD];

/// Owner id stamp.
pub const OWNER_ID_FIELD: &str = "ownerId";
/// Application id stamp.
pub const APP_ID_FIELD: &str = "appId";
/// Provenance stamp.
pub const MIGRATED_FROM_FIELD: &str = "migratedFrom";
/// Value of the provenance stamp.
pub const MIGRATED_FROM: &str = "legacy";
/// Map merged into the owner root document after an import.
pub const MIGRATION_FIELD: &str = "migration";

/// Role given to an owner created by the migration.
pub const OWNER_ROLE: &str = "admin";
/// Status given to an owner created by the migration.
pub const OWNER_STATUS: &str = "active";

/// Outcome written into the owner's `migration` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Every entity was written.
    Complete,
    /// Some entities failed.
    Partial,
}

impl MigrationStatus {
    /// Stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
        }
    }
}

/// Applies the mapping table to legacy documents.
#[derive(Debug, Clone)]
pub struct Transformer {
    mapping: MappingConfig,
}

impl Transformer {
    /// Create a new transformer.
    #[must_use]
    pub fn new(mapping: MappingConfig) -> Self {
        Self { mapping }
    }

    /// The mapping table in use.
    #[must_use]
    pub fn mapping(&self) -> &MappingConfig {
        &self.mapping
    }

    /// Mapping row for a legacy collection, `None` when unmapped.
    #[must_use]
    pub fn collection(&self, legacy: &str) -> Option<&CollectionMapping> {
        self.mapping.collection(legacy)
    }

    /// Fallback id fields declared for a legacy collection.
    #[must_use]
    pub fn id_fields(&self, legacy: &str) -> &[String] {
        self.collection(legacy)
            .map_or(&[][..], |c| c.id_fields.as_slice())
    }

    /// Maps one legacy document to its owner-side form.
    ///
    /// Dropped fields are removed, renamed fields moved, and the ownership
    /// stamps set. The document id is kept.
    #[must_use]
    pub fn transform(&self, doc: &Document, owner_id: &str) -> Document {
        let mut fields: Fields = doc
            .fields
            .iter()
            .filter(|(name, _)| !self.mapping.dropped_fields.contains(*name))
            .map(|(name, value)| {
                let name = self
                    .mapping
                    .field_renames
                    .get(name)
                    .unwrap_or(name)
                    .clone();
                (name, value.clone())
            })
            .collect();

        fields.insert(
            OWNER_ID_FIELD.to_string(),
            FieldValue::String(owner_id.to_string()),
        );
        fields.insert(
            APP_ID_FIELD.to_string(),
            FieldValue::String(self.mapping.app_id.clone()),
        );
        fields.insert(
            MIGRATED_FROM_FIELD.to_string(),
            FieldValue::String(MIGRATED_FROM.to_string()),
        );

        Document::new(doc.id.clone(), fields)
    }

    /// Fields of a freshly created owner root document.
    #[must_use]
    pub fn owner_root_document(&self, owner_id: &str, created_at: Timestamp) -> Fields {
        let mut fields = Fields::new();
        fields.insert("uid".to_string(), FieldValue::String(owner_id.to_string()));
        fields.insert(
            APP_ID_FIELD.to_string(),
            FieldValue::String(self.mapping.app_id.clone()),
        );
        fields.insert("role".to_string(), FieldValue::String(OWNER_ROLE.to_string()));
        fields.insert(
            "status".to_string(),
            FieldValue::String(OWNER_STATUS.to_string()),
        );
        fields.insert("createdAt".to_string(), FieldValue::Timestamp(created_at));
        fields.insert(
            MIGRATED_FROM_FIELD.to_string(),
            FieldValue::String(MIGRATED_FROM.to_string()),
        );
        fields
    }

    /// The `migration` map merged into the owner root after an import.
    #[must_use]
    pub fn migration_marker(legacy_user_id: &str, failed: usize) -> Fields {
        let status = if failed == 0 {
            MigrationStatus::Complete
        } else {
            MigrationStatus::Partial
        };

        let mut marker = Fields::new();
        marker.insert(
            "legacyUserId".to_string(),
            FieldValue::String(legacy_user_id.to_string()),
        );
        marker.insert(
            "status".to_string(),
            FieldValue::String(status.as_str().to_string()),
        );
        marker.insert(
            "failed".to_string(),
            FieldValue::Integer(i64::try_from(failed).unwrap_or(i64::MAX)),
        );

        let mut fields = Fields::new();
        fields.insert(MIGRATION_FIELD.to_string(), FieldValue::Map(marker));
        fields
    }
}
