//! Typed document values and their snapshot JSON encoding.
//!
//! Legacy records have no fixed schema, so documents are kept as an ordered
//! map of field name to [`FieldValue`]. The snapshot encoding is plain JSON
//! with a handful of tagged objects for values JSON cannot express directly:
//!
//! | Value | Snapshot JSON |
//! |-------|---------------|
//! | timestamp | `{"_seconds": 1700000000, "_nanoseconds": 0}` |
//! | geo point | `{"_latitude": -34.6, "_longitude": -58.4}` |
//! | reference | `{"_referencePath": "apps/auditoria/owners/x"}` |
//! | bytes | `{"_bytes": "aGVsbG8="}` |
//! | non-finite double | `{"_double": "NaN"}` |
//!
//! The timestamp shape is the one `firebase-admin` produces, so snapshots
//! written by the older Node export scripts decode the same way.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Field map of a document, ordered by field name.
pub type Fields = BTreeMap<String, FieldValue>;

/// Key holding the document id in a snapshot row.
pub const ID_KEY: &str = "id";

/// Key holding the document id when the document has its own `id` field.
pub const RESERVED_ID_KEY: &str = "__id__";

const SECONDS_KEY: &str = "_seconds";
const NANOS_KEY: &str = "_nanoseconds";
const LATITUDE_KEY: &str = "_latitude";
const LONGITUDE_KEY: &str = "_longitude";
const REFERENCE_KEY: &str = "_referencePath";
const BYTES_KEY: &str = "_bytes";
const DOUBLE_KEY: &str = "_double";

/// Earliest timestamp Firestore stores, `0001-01-01T00:00:00Z`.
pub const MIN_TIMESTAMP_SECONDS: i64 = -62_135_596_800;

/// Latest timestamp Firestore stores, `9999-12-31T23:59:59Z`.
pub const MAX_TIMESTAMP_SECONDS: i64 = 253_402_300_799;

/// A point in time with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Sub-second nanoseconds, always below one billion.
    pub nanos: u32,
}

impl Timestamp {
    /// Creates a timestamp, rejecting values Firestore cannot store.
    pub fn new(seconds: i64, nanos: u32) -> Result<Self> {
        if nanos >= 1_000_000_000 {
            return Err(Error::InvalidDocument(format!(
                "timestamp nanoseconds out of range: {nanos}"
            )));
        }
        if !(MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS).contains(&seconds) {
            return Err(Error::InvalidDocument(format!(
                "timestamp seconds out of range: {seconds}"
            )));
        }
        Ok(Self { seconds, nanos })
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            seconds: now.timestamp(),
            nanos: now.timestamp_subsec_nanos(),
        }
    }

    /// Parses an RFC 3339 timestamp such as `2024-03-01T12:00:00.5Z`.
    pub fn parse_rfc3339(text: &str) -> Result<Self> {
        let parsed = DateTime::parse_from_rfc3339(text)
            .map_err(|e| Error::InvalidDocument(format!("bad timestamp '{text}': {e}")))?;
        Self::new(parsed.timestamp(), parsed.timestamp_subsec_nanos())
    }

    /// Formats as RFC 3339 in UTC with the shortest exact fractional part.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` for a timestamp outside Firestore's range.
    pub fn to_rfc3339(&self) -> Result<String> {
        let checked = Self::new(self.seconds, self.nanos)?;
        DateTime::<Utc>::from_timestamp(checked.seconds, checked.nanos)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .ok_or_else(|| {
                Error::InvalidDocument(format!("timestamp not representable: {}", self.seconds))
            })
    }
}

/// A single Firestore field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Timestamp.
    Timestamp(Timestamp),
    /// Geographic point.
    GeoPoint {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },
    /// Reference to another document, as a path relative to the database root.
    Reference(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Array of values.
    Array(Vec<FieldValue>),
    /// Nested map.
    Map(Fields),
}

impl FieldValue {
    /// Short type name used in reports.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::GeoPoint { .. } => "geopoint",
            Self::Reference(_) => "reference",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    /// Returns the string content if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Encodes this value in the snapshot JSON format.
    #[must_use]
    pub fn to_snapshot_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Boolean(b) => Value::Bool(*b),
            Self::Integer(i) => Value::from(*i),
            Self::Double(d) => match Number::from_f64(*d) {
                Some(n) => Value::Number(n),
                None => tagged(DOUBLE_KEY, Value::from(non_finite_name(*d))),
            },
            Self::String(s) => Value::String(s.clone()),
            Self::Timestamp(ts) => {
                let mut map = Map::new();
                map.insert(SECONDS_KEY.to_string(), Value::from(ts.seconds));
                map.insert(NANOS_KEY.to_string(), Value::from(ts.nanos));
                Value::Object(map)
            }
            Self::GeoPoint {
                latitude,
                longitude,
            } => {
                let mut map = Map::new();
                map.insert(LATITUDE_KEY.to_string(), Value::from(*latitude));
                map.insert(LONGITUDE_KEY.to_string(), Value::from(*longitude));
                Value::Object(map)
            }
            Self::Reference(path) => tagged(REFERENCE_KEY, Value::String(path.clone())),
            Self::Bytes(bytes) => tagged(BYTES_KEY, Value::String(BASE64.encode(bytes))),
            Self::Array(values) => {
                Value::Array(values.iter().map(FieldValue::to_snapshot_json).collect())
            }
            Self::Map(fields) => Value::Object(fields_to_json(fields)),
        }
    }

    /// Decodes a snapshot JSON value. Unrecognised objects become maps.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` when a timestamp-shaped object holds a
    /// time Firestore cannot store.
    pub fn from_snapshot_json(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s.clone()),
            Value::Array(values) => Self::Array(
                values
                    .iter()
                    .map(FieldValue::from_snapshot_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(map) => match decode_tagged(map)? {
                Some(tagged) => tagged,
                None => Self::Map(fields_from_json(map)?),
            },
        })
    }
}

fn tagged(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn non_finite_name(value: f64) -> &'static str {
    if value.is_nan() {
        "NaN"
    } else if value.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn has_exactly(map: &Map<String, Value>, keys: &[&str]) -> bool {
    map.len() == keys.len() && keys.iter().all(|k| map.contains_key(*k))
}

fn decode_tagged(map: &Map<String, Value>) -> Result<Option<FieldValue>> {
    if map.contains_key(SECONDS_KEY) && map.keys().all(|k| k == SECONDS_KEY || k == NANOS_KEY) {
        let Some(seconds) = map.get(SECONDS_KEY).and_then(Value::as_i64) else {
            return Ok(None);
        };
        let nanos = match map.get(NANOS_KEY) {
            Some(v) => match v.as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(n) => n,
                None => return Ok(None),
            },
            None => 0,
        };
        return Timestamp::new(seconds, nanos).map(|ts| Some(FieldValue::Timestamp(ts)));
    }
    Ok(decode_other_tagged(map))
}

fn decode_other_tagged(map: &Map<String, Value>) -> Option<FieldValue> {
    if has_exactly(map, &[LATITUDE_KEY, LONGITUDE_KEY]) {
        return Some(FieldValue::GeoPoint {
            latitude: map.get(LATITUDE_KEY)?.as_f64()?,
            longitude: map.get(LONGITUDE_KEY)?.as_f64()?,
        });
    }
    if has_exactly(map, &[REFERENCE_KEY]) {
        return map
            .get(REFERENCE_KEY)?
            .as_str()
            .map(|p| FieldValue::Reference(p.to_string()));
    }
    if has_exactly(map, &[BYTES_KEY]) {
        let encoded = map.get(BYTES_KEY)?.as_str()?;
        return BASE64.decode(encoded).ok().map(FieldValue::Bytes);
    }
    if has_exactly(map, &[DOUBLE_KEY]) {
        return match map.get(DOUBLE_KEY)?.as_str()? {
            "NaN" => Some(FieldValue::Double(f64::NAN)),
            "Infinity" => Some(FieldValue::Double(f64::INFINITY)),
            "-Infinity" => Some(FieldValue::Double(f64::NEG_INFINITY)),
            _ => None,
        };
    }
    None
}

/// Encodes a field map as a JSON object.
#[must_use]
pub fn fields_to_json(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), v.to_snapshot_json()))
        .collect()
}

/// Decodes a JSON object into a field map.
///
/// # Errors
///
/// Fails on the first value [`FieldValue::from_snapshot_json`] rejects.
pub fn fields_from_json(map: &Map<String, Value>) -> Result<Fields> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), FieldValue::from_snapshot_json(v)?)))
        .collect()
}

/// A document: its id within the parent collection plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document id (last path segment).
    pub id: String,
    /// Field values.
    pub fields: Fields,
}

impl Document {
    /// Creates a document.
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Looks up a top-level field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Encodes the document as a flat snapshot row.
    #[must_use]
    pub fn to_snapshot_row(&self) -> Value {
        let mut row = fields_to_json(&self.fields);
        let key = if self.fields.contains_key(ID_KEY) {
            RESERVED_ID_KEY
        } else {
            ID_KEY
        };
        row.insert(key.to_string(), Value::String(self.id.clone()));
        Value::Object(row)
    }

    /// Decodes a snapshot row.
    ///
    /// The id is taken from `__id__`, then `id`, then each of
    /// `fallback_id_fields` in order, then `uid`.
    pub fn from_snapshot_row(row: &Value, fallback_id_fields: &[String]) -> Result<Self> {
        let Value::Object(map) = row else {
            return Err(Error::InvalidDocument(format!(
                "snapshot row is a {} not an object",
                json_kind(row)
            )));
        };

        if let Some(id) = map.get(RESERVED_ID_KEY).and_then(id_text) {
            let mut fields = fields_from_json(map)?;
            fields.remove(RESERVED_ID_KEY);
            return Ok(Self::new(id, fields));
        }

        if let Some(id) = map.get(ID_KEY).and_then(id_text) {
            let mut fields = fields_from_json(map)?;
            fields.remove(ID_KEY);
            return Ok(Self::new(id, fields));
        }

        let id = fallback_id_fields
            .iter()
            .map(String::as_str)
            .chain(std::iter::once("uid"))
            .find_map(|key| map.get(key).and_then(id_text))
            .ok_or_else(|| {
                Error::InvalidDocument(format!(
                    "row has no document id (tried {}, {}, uid)",
                    ID_KEY,
                    if fallback_id_fields.is_empty() {
                        "-".to_string()
                    } else {
                        fallback_id_fields.join(", ")
                    }
                ))
            })?;
        Ok(Self::new(id, fields_from_json(map)?))
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
