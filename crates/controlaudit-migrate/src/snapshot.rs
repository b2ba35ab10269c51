//! On-disk snapshot of a legacy user.
//!
//! Layout of `{snapshot_dir}/{legacyUserId}/`:
//!
//! - `{collection}.json`: pretty JSON array of rows, sorted by document id
//! - `__user__.json`: the profile document as a single row
//! - `__manifest__.json`: [`SnapshotManifest`]
//!
//! Writes go to a sibling staging directory that replaces the snapshot only
//! once every file is on disk.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::document::Document;
use crate::error::{Error, Result};

/// Profile document file.
pub const USER_FILE: &str = "__user__.json";

/// Manifest file.
pub const MANIFEST_FILE: &str = "__manifest__.json";

const JSON_EXT: &str = "json";

/// Summary of what an export wrote. Carries no wall-clock data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotManifest {
    /// Exported legacy user.
    pub legacy_user_id: String,
    /// Database path the snapshot was read from.
    pub source_path: String,
    /// Document count per collection.
    pub collections: BTreeMap<String, usize>,
}

fn is_reserved(file_stem: &str) -> bool {
    file_stem.starts_with("__") && file_stem.ends_with("__")
}

/// Read access to one legacy user's snapshot directory.
#[derive(Debug, Clone)]
pub struct Snapshot {
    dir: PathBuf,
}

impl Snapshot {
    /// Snapshot of `legacy_user_id` under `root`.
    #[must_use]
    pub fn new(root: &Path, legacy_user_id: &str) -> Self {
        Self {
            dir: root.join(legacy_user_id),
        }
    }

    /// Snapshot directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the directory exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Path of a collection file.
    #[must_use]
    pub fn collection_file(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.{JSON_EXT}"))
    }

    /// Collection names present in the snapshot, sorted. Empty when the
    /// directory does not exist.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        if !self.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(JSON_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !is_reserved(stem) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Raw rows of a collection file. A missing file is an empty collection.
    pub fn read_rows(&self, collection: &str) -> Result<Vec<Value>> {
        let path = self.collection_file(collection);
        if !path.is_file() {
            debug!("No snapshot file for {}, treating as empty", collection);
            return Ok(Vec::new());
        }

        match read_json(&path)? {
            Value::Array(rows) => Ok(rows),
            other => Err(Error::Snapshot(format!(
                "{} holds a JSON {} instead of an array",
                path.display(),
                kind(&other)
            ))),
        }
    }

    /// The manifest, if present.
    pub fn read_manifest(&self) -> Result<Option<SnapshotManifest>> {
        let path = self.dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let value = read_json(&path)?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::Snapshot(format!("{}: {e}", path.display())))
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Snapshot(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Snapshot(format!("{} is not valid JSON: {e}", path.display())))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Writes `value` as pretty JSON with a trailing newline.
fn write_json(path: &Path, value: &Value) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}

/// Builds a snapshot in a staging directory and swaps it into place.
///
/// Dropping the writer without [`commit`](Self::commit) removes the staging
/// directory and leaves any previous snapshot untouched.
#[derive(Debug)]
pub struct SnapshotWriter {
    target: PathBuf,
    staging: PathBuf,
    committed: bool,
}

impl SnapshotWriter {
    /// Starts a snapshot of `legacy_user_id` under `root`.
    pub fn begin(root: &Path, legacy_user_id: &str) -> Result<Self> {
        fs::create_dir_all(root)?;
        let target = root.join(legacy_user_id);
        let staging = root.join(format!(".{legacy_user_id}.staging"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        Ok(Self {
            target,
            staging,
            committed: false,
        })
    }

    /// Writes the profile document.
    pub fn write_profile(&self, profile: &Document) -> Result<()> {
        write_json(&self.staging.join(USER_FILE), &profile.to_snapshot_row())
    }

    /// Writes one collection file with rows sorted by document id.
    pub fn write_collection(&self, collection: &str, documents: &[Document]) -> Result<()> {
        if is_reserved(collection) {
            return Err(Error::Snapshot(format!(
                "collection name '{collection}' collides with a reserved file"
            )));
        }
        let mut sorted: Vec<&Document> = documents.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let rows: Vec<Value> = sorted.iter().map(|d| d.to_snapshot_row()).collect();
        write_json(
            &self.staging.join(format!("{collection}.{JSON_EXT}")),
            &Value::Array(rows),
        )
    }

    /// Writes the manifest.
    pub fn write_manifest(&self, manifest: &SnapshotManifest) -> Result<()> {
        write_json(
            &self.staging.join(MANIFEST_FILE),
            &serde_json::to_value(manifest)?,
        )
    }

    /// Replaces the previous snapshot with the staged one.
    pub fn commit(mut self) -> Result<PathBuf> {
        if self.target.exists() {
            let mut retired = self.staging.clone();
            retired.set_extension("old");
            if retired.exists() {
                fs::remove_dir_all(&retired)?;
            }
            fs::rename(&self.target, &retired)?;
            fs::rename(&self.staging, &self.target)?;
            fs::remove_dir_all(&retired)?;
        } else {
            fs::rename(&self.staging, &self.target)?;
        }
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if !self.committed && self.staging.exists() {
            let _ = fs::remove_dir_all(&self.staging);
        }
    }
}
