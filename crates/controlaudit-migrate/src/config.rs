//! Configuration types for controlaudit-migrate.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::store::{is_within, validate_collection_path, validate_segment};
use crate::transform::STAMP_FIELDS;

/// Main migration configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Database connection.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Legacy, owner and snapshot locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Legacy → owner mapping table.
    #[serde(default)]
    pub mapping: MappingConfig,
    /// Run options.
    #[serde(default)]
    pub options: MigrationOptions,
}

/// Firestore connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Project id. Defaults to the one in the credentials file.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Service-account key file.
    #[serde(default)]
    pub credentials: Option<PathBuf>,
    /// Database id inside the project.
    #[serde(default = "default_database_id")]
    pub database_id: String,
    /// Emulator `host:port`. When set, no credentials are needed.
    #[serde(default)]
    pub emulator_host: Option<String>,
    /// API base URL override (e.g. a regional endpoint).
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            credentials: None,
            database_id: default_database_id(),
            emulator_host: None,
            endpoint: None,
        }
    }
}

/// Where data lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Collection holding legacy user documents.
    #[serde(default = "default_legacy_root")]
    pub legacy_root: String,
    /// Collection holding owner documents.
    #[serde(default = "default_owner_root")]
    pub owner_root: String,
    /// Local directory holding one snapshot directory per legacy user.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            legacy_root: default_legacy_root(),
            owner_root: default_owner_root(),
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

/// One row of the collection mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMapping {
    /// Sub-collection name under the legacy user.
    pub legacy: String,
    /// Sub-collection name under the owner.
    pub owner: String,
    /// Fields tried, in order, when a snapshot row has no `id`.
    #[serde(default)]
    pub id_fields: Vec<String>,
}

impl CollectionMapping {
    fn same(name: &str, id_field: &str) -> Self {
        Self {
            legacy: name.to_string(),
            owner: name.to_string(),
            id_fields: vec![id_field.to_string()],
        }
    }
}

/// A field that must point at a document of another mapped collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRule {
    /// Legacy collection holding the field.
    pub collection: String,
    /// Field holding the referenced document id.
    pub field: String,
    /// Legacy collection the id must exist in.
    pub target: String,
}

/// Legacy → owner mapping table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// `appId` stamped on every migrated document.
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Collections to migrate and where they go.
    #[serde(default = "default_collections")]
    pub collections: Vec<CollectionMapping>,
    /// Fields with no owner-centric equivalent.
    #[serde(default = "default_dropped_fields")]
    pub dropped_fields: Vec<String>,
    /// Field renames (`legacy_field` -> `owner_field`).
    #[serde(default)]
    pub field_renames: BTreeMap<String, String>,
    /// Reference integrity rules checked by the inspector.
    #[serde(default = "default_references")]
    pub references: Vec<ReferenceRule>,
    /// Collections whose missing documents block the import recommendation.
    #[serde(default = "default_required_collections")]
    pub required_collections: Vec<String>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            collections: default_collections(),
            dropped_fields: default_dropped_fields(),
            field_renames: BTreeMap::new(),
            references: default_references(),
            required_collections: default_required_collections(),
        }
    }
}

impl MappingConfig {
    /// Looks up the mapping row for a legacy collection.
    #[must_use]
    pub fn collection(&self, legacy: &str) -> Option<&CollectionMapping> {
        self.collections.iter().find(|c| c.legacy == legacy)
    }
}

/// How the importer treats documents that already exist at the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Overwrite with the mapped legacy document (default).
    #[default]
    Upsert,
    /// Leave existing destination documents untouched.
    SkipExisting,
}

/// Migration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Concurrent entity writes per collection.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Existing-document policy.
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Dry run mode (don't write to destination).
    #[serde(default)]
    pub dry_run: bool,
    /// Documents per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Retries per database call on transient errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            write_mode: WriteMode::default(),
            dry_run: false,
            page_size: default_page_size(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_database_id() -> String {
    "(default)".to_string()
}

fn default_legacy_root() -> String {
    "apps/auditoria/users".to_string()
}

fn default_owner_root() -> String {
    "apps/auditoria/owners".to_string()
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("migracion").join("legacy")
}

fn default_app_id() -> String {
    "auditoria".to_string()
}

fn default_collections() -> Vec<CollectionMapping> {
    vec![
        CollectionMapping::same("empresas", "empresaId"),
        CollectionMapping::same("sucursales", "sucursalId"),
        CollectionMapping::same("empleados", "empleadoId"),
        CollectionMapping::same("formularios", "formularioId"),
        CollectionMapping::same("capacitaciones", "capacitacionId"),
        CollectionMapping::same("reportes", "reporteId"),
        CollectionMapping::same("accidentes", "accidenteId"),
    ]
}

fn default_dropped_fields() -> Vec<String> {
    vec!["clienteAdminId".to_string(), "propietarioId".to_string()]
}

fn default_references() -> Vec<ReferenceRule> {
    vec![ReferenceRule {
        collection: "sucursales".to_string(),
        field: "empresaId".to_string(),
        target: "empresas".to_string(),
    }]
}

fn default_required_collections() -> Vec<String> {
    vec!["empresas".to_string()]
}

fn default_workers() -> usize {
    4
}

fn default_page_size() -> u32 {
    300
}

fn default_max_retries() -> u32 {
    3
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Firestore path of a legacy user document.
    #[must_use]
    pub fn legacy_user_path(&self, legacy_user_id: &str) -> String {
        crate::store::join_path(&self.paths.legacy_root, legacy_user_id)
    }

    /// Firestore path of an owner document.
    #[must_use]
    pub fn owner_path(&self, owner_id: &str) -> String {
        crate::store::join_path(&self.paths.owner_root, owner_id)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(project) = &self.database.project_id {
            validate_segment(project, "project_id")?;
        }
        if self.database.database_id.trim().is_empty() {
            return Err(Error::Config("database_id cannot be empty".to_string()));
        }
        if let Some(endpoint) = &self.database.endpoint {
            crate::store::common::validate_url(endpoint)?;
        }

        validate_collection_path(&self.paths.legacy_root, "legacy_root")?;
        validate_collection_path(&self.paths.owner_root, "owner_root")?;
        if is_within(&self.paths.owner_root, &self.paths.legacy_root)
            || is_within(&self.paths.legacy_root, &self.paths.owner_root)
        {
            return Err(Error::Config(format!(
                "owner_root '{}' and legacy_root '{}' must not overlap",
                self.paths.owner_root, self.paths.legacy_root
            )));
        }
        if self.paths.snapshot_dir.as_os_str().is_empty() {
            return Err(Error::Config("snapshot_dir cannot be empty".to_string()));
        }

        self.validate_mapping()?;

        if self.options.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if !(1..=1000).contains(&self.options.page_size) {
            return Err(Error::Config(
                "page_size must be between 1 and 1000".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_mapping(&self) -> Result<()> {
        let mapping = &self.mapping;
        if mapping.app_id.trim().is_empty() {
            return Err(Error::Config("app_id cannot be empty".to_string()));
        }
        if mapping.collections.is_empty() {
            return Err(Error::Config(
                "mapping must declare at least one collection".to_string(),
            ));
        }

        let mut legacy_names = BTreeSet::new();
        let mut owner_names = BTreeSet::new();
        for row in &mapping.collections {
            validate_segment(&row.legacy, "legacy collection")?;
            validate_segment(&row.owner, "owner collection")?;
            if !legacy_names.insert(row.legacy.as_str()) {
                return Err(Error::Config(format!(
                    "legacy collection '{}' is mapped twice",
                    row.legacy
                )));
            }
            if !owner_names.insert(row.owner.as_str()) {
                return Err(Error::Config(format!(
                    "owner collection '{}' is a target twice",
                    row.owner
                )));
            }
        }

        for rule in &mapping.references {
            for name in [&rule.collection, &rule.target] {
                if !legacy_names.contains(name.as_str()) {
                    return Err(Error::Config(format!(
                        "reference rule uses unmapped collection '{name}'"
                    )));
                }
            }
        }
        for name in &mapping.required_collections {
            if !legacy_names.contains(name.as_str()) {
                return Err(Error::Config(format!(
                    "required collection '{name}' is not mapped"
                )));
            }
        }

        let mut rename_targets = BTreeSet::new();
        for (from, to) in &mapping.field_renames {
            if mapping.dropped_fields.contains(from) {
                return Err(Error::Config(format!(
                    "field '{from}' is both dropped and renamed"
                )));
            }
            if STAMP_FIELDS.contains(&to.as_str()) {
                return Err(Error::Config(format!(
                    "field '{from}' cannot be renamed to reserved field '{to}'"
                )));
            }
            if !rename_targets.insert(to.as_str()) {
                return Err(Error::Config(format!(
                    "two fields are renamed to '{to}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MigrationConfig::default();
        assert_eq!(config.paths.legacy_root, "apps/auditoria/users");
        assert_eq!(config.paths.owner_root, "apps/auditoria/owners");
        assert_eq!(config.mapping.collections.len(), 7);
        assert_eq!(config.options.workers, 4);
        assert_eq!(config.options.write_mode, WriteMode::Upsert);
        assert!(!config.options.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_paths() {
        let config = MigrationConfig::default();
        assert_eq!(config.legacy_user_path("u1"), "apps/auditoria/users/u1");
        assert_eq!(config.owner_path("o1"), "apps/auditoria/owners/o1");
    }

    #[test]
    fn test_config_yaml_parse() {
        let yaml = r#"
database:
  project_id: controlaudit-prod
  credentials: ./serviceAccountKey-controlfile.json
paths:
  owner_root: owners
  legacy_root: users
mapping:
  collections:
    - legacy: companies
      owner: companies
    - legacy: branches
      owner: sites
      id_fields: [branchId]
  references: []
  required_collections: [companies]
options:
  workers: 2
  write_mode: skip_existing
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database.project_id.as_deref(), Some("controlaudit-prod"));
        assert_eq!(config.database.database_id, "(default)");
        assert_eq!(config.paths.owner_root, "owners");
        assert_eq!(config.mapping.collection("branches").unwrap().owner, "sites");
        assert_eq!(config.mapping.dropped_fields, default_dropped_fields());
        assert_eq!(config.options.write_mode, WriteMode::SkipExisting);
        assert_eq!(config.options.page_size, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_overlapping_roots() {
        let mut config = MigrationConfig::default();
        config.paths.owner_root = "apps/auditoria/users/u1/owners".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_mapping() {
        let mut config = MigrationConfig::default();
        config
            .mapping
            .collections
            .push(CollectionMapping::same("empresas", "empresaId"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unmapped_reference() {
        let mut config = MigrationConfig::default();
        config.mapping.references.push(ReferenceRule {
            collection: "empleados".to_string(),
            field: "areaId".to_string(),
            target: "areas".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_rename_onto_stamp_field() {
        let mut config = MigrationConfig::default();
        config
            .mapping
            .field_renames
            .insert("creadorId".to_string(), "ownerId".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = MigrationConfig::default();
        config.options.workers = 0;
        assert!(config.validate().is_err());
    }
}
