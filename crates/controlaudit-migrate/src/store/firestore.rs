//! Firestore REST (v1) document store.
//!
//! Talks to `https://firestore.googleapis.com/v1/projects/{p}/databases/{d}/documents`
//! or to the local emulator. Values travel in Firestore's typed JSON form
//! (`{"stringValue": "..."}`, `{"integerValue": "42"}`, ...) and are mapped
//! to [`FieldValue`] at this boundary only.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::{DatabaseConfig, MigrationOptions};
use crate::document::{Document, FieldValue, Fields, Timestamp};
use crate::error::{Error, Result};
use crate::retry::{with_retry, RetryConfig};
use crate::store::auth::{ServiceAccountAuth, ServiceAccountKey, TokenSource};
use crate::store::common::{create_http_client, handle_http_error, validate_url};
use crate::store::DocumentStore;

/// Public Firestore endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com";

/// Bearer token the emulator treats as an admin.
pub const EMULATOR_TOKEN: &str = "owner";

/// Project id used against the emulator when none is configured.
pub const EMULATOR_PROJECT: &str = "demo-controlaudit";

/// Firestore REST [`DocumentStore`].
pub struct FirestoreStore {
    client: Client,
    documents_url: String,
    database_name: String,
    auth: TokenSource,
    retry: RetryConfig,
    page_size: u32,
}

impl FirestoreStore {
    /// Creates a store for `project_id`/`database_id` behind `endpoint`.
    pub fn new(
        endpoint: &str,
        project_id: &str,
        database_id: &str,
        auth: TokenSource,
    ) -> Result<Self> {
        validate_url(endpoint)?;
        let database_name = format!("projects/{project_id}/databases/{database_id}");
        Ok(Self {
            client: create_http_client(),
            documents_url: format!(
                "{}/v1/{}/documents",
                endpoint.trim_end_matches('/'),
                database_name
            ),
            database_name,
            auth,
            retry: RetryConfig::default(),
            page_size: 300,
        })
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the listing page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Builds a store from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when neither an emulator nor a readable
    /// credentials file is configured, or no project id can be determined.
    pub fn from_config(config: &DatabaseConfig, options: &MigrationOptions) -> Result<Self> {
        let retry = RetryConfig::with_max_retries(options.max_retries);

        if let Some(host) = config.emulator_host.as_deref().filter(|h| !h.is_empty()) {
            let project = config.project_id.as_deref().unwrap_or(EMULATOR_PROJECT);
            info!("Using Firestore emulator at {} (project {})", host, project);
            let endpoint = if host.contains("://") {
                host.to_string()
            } else {
                format!("http://{host}")
            };
            return Ok(Self::new(
                &endpoint,
                project,
                &config.database_id,
                TokenSource::Static(EMULATOR_TOKEN.to_string()),
            )?
            .with_retry(retry)
            .with_page_size(options.page_size));
        }

        let credentials = config.credentials.as_ref().ok_or_else(|| {
            Error::Config(
                "no credentials file configured (use --credentials or GOOGLE_APPLICATION_CREDENTIALS)"
                    .to_string(),
            )
        })?;
        let key = ServiceAccountKey::from_file(credentials)?;
        let project = config
            .project_id
            .clone()
            .or_else(|| key.project_id.clone())
            .ok_or_else(|| {
                Error::Config("project_id missing from config and credentials".to_string())
            })?;
        let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        info!(
            "Using Firestore project {} as {}",
            project, key.client_email
        );

        let auth = TokenSource::ServiceAccount(ServiceAccountAuth::new(key, create_http_client()));
        Ok(Self::new(endpoint, &project, &config.database_id, auth)?
            .with_retry(retry)
            .with_page_size(options.page_size))
    }

    /// `projects/{p}/databases/{d}`.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    fn url_for(&self, path: &str, suffix: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.documents_url)
            .map_err(|e| Error::Config(format!("bad endpoint '{}': {e}", self.documents_url)))?;
        let mut segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if let (Some(suffix), Some(last)) = (suffix, segments.last_mut()) {
            last.push_str(suffix);
        }
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("endpoint '{}' cannot be a base", self.documents_url)))?
            .extend(segments.iter());
        Ok(url)
    }

    /// Sends one request with retries. Statuses in `tolerated` are returned
    /// to the caller instead of being turned into errors.
    async fn call(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
        context: &str,
        tolerated: &[StatusCode],
    ) -> Result<(StatusCode, Value)> {
        let method = &method;
        with_retry(&self.retry, context, move || async move {
            let token = self.auth.bearer().await?;
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }
            debug!("{} {}", method, url);

            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;

            if status.is_success() || tolerated.contains(&status) {
                let value = if text.trim().is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(&text)?
                };
                return Ok((status, value));
            }
            Err(handle_http_error(status.as_u16(), &text, context))
        })
        .await
    }

    fn fields_body(&self, fields: &Fields) -> Result<Value> {
        Ok(json!({ "fields": encode_fields(fields, &self.database_name)? }))
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    fn store_type(&self) -> &'static str {
        "firestore"
    }

    async fn get_document(&self, path: &str) -> Result<Option<Fields>> {
        let url = self.url_for(path, None)?;
        let context = format!("get {path}");
        let (status, body) = self
            .call(Method::GET, &url, None, &context, &[StatusCode::NOT_FOUND])
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode_fields(body.get("fields"), &self.database_name).map(Some)
    }

    async fn list_collection_ids(&self, document_path: &str) -> Result<Vec<String>> {
        let url = self.url_for(document_path, Some(":listCollectionIds"))?;
        let context = format!("list collections of {document_path}");
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = json!({ "pageSize": self.page_size });
            if let Some(token) = &page_token {
                request["pageToken"] = Value::String(token.clone());
            }
            let (_, body) = self
                .call(Method::POST, &url, Some(&request), &context, &[])
                .await?;

            if let Some(found) = body.get("collectionIds").and_then(Value::as_array) {
                ids.extend(found.iter().filter_map(Value::as_str).map(String::from));
            }
            page_token = next_page_token(&body);
            if page_token.is_none() {
                break;
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn list_documents(&self, collection_path: &str) -> Result<Vec<Document>> {
        let base = self.url_for(collection_path, None)?;
        let context = format!("list {collection_path}");
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("pageSize", &self.page_size.to_string());
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let (_, body) = self.call(Method::GET, &url, None, &context, &[]).await?;

            if let Some(found) = body.get("documents").and_then(Value::as_array) {
                for raw in found {
                    documents.push(decode_document(raw, &self.database_name)?);
                }
            }
            page_token = next_page_token(&body);
            if page_token.is_none() {
                break;
            }
        }

        documents.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("Listed {} documents in {}", documents.len(), collection_path);
        Ok(documents)
    }

    async fn set_document(&self, path: &str, fields: &Fields) -> Result<()> {
        let url = self.url_for(path, None)?;
        let body = self.fields_body(fields)?;
        self.call(Method::PATCH, &url, Some(&body), &format!("set {path}"), &[])
            .await?;
        Ok(())
    }

    async fn create_document(&self, path: &str, fields: &Fields) -> Result<bool> {
        let mut url = self.url_for(path, None)?;
        url.query_pairs_mut()
            .append_pair("currentDocument.exists", "false");
        let body = self.fields_body(fields)?;
        let context = format!("create {path}");
        let tolerated = [
            StatusCode::CONFLICT,
            StatusCode::PRECONDITION_FAILED,
            StatusCode::BAD_REQUEST,
        ];
        let (status, response) = self
            .call(Method::PATCH, &url, Some(&body), &context, &tolerated)
            .await?;

        if status.is_success() {
            return Ok(true);
        }
        let reason = response
            .pointer("/error/status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if status != StatusCode::BAD_REQUEST
            || reason == "FAILED_PRECONDITION"
            || reason == "ALREADY_EXISTS"
        {
            return Ok(false);
        }
        Err(handle_http_error(
            status.as_u16(),
            &response.to_string(),
            &context,
        ))
    }

    async fn merge_document(&self, path: &str, fields: &Fields) -> Result<()> {
        let mut url = self.url_for(path, None)?;
        {
            let mut query = url.query_pairs_mut();
            for name in fields.keys() {
                query.append_pair("updateMask.fieldPaths", &quote_field_path(name));
            }
        }
        let body = self.fields_body(fields)?;
        self.call(Method::PATCH, &url, Some(&body), &format!("merge {path}"), &[])
            .await?;
        Ok(())
    }
}

fn next_page_token(body: &Value) -> Option<String> {
    body.get("nextPageToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(String::from)
}

/// Quotes a field name for use in a field path when it is not a plain identifier.
#[must_use]
pub fn quote_field_path(name: &str) -> String {
    let simple = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Encodes a value in Firestore's typed JSON form.
///
/// # Errors
///
/// Returns `InvalidDocument` for a timestamp Firestore cannot store.
pub fn encode_value(value: &FieldValue, database_name: &str) -> Result<Value> {
    Ok(match value {
        FieldValue::Null => json!({ "nullValue": null }),
        FieldValue::Boolean(b) => json!({ "booleanValue": b }),
        FieldValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        FieldValue::Double(d) if d.is_finite() => json!({ "doubleValue": d }),
        FieldValue::Double(d) => {
            let text = if d.is_nan() {
                "NaN"
            } else if d.is_sign_positive() {
                "Infinity"
            } else {
                "-Infinity"
            };
            json!({ "doubleValue": text })
        }
        FieldValue::String(s) => json!({ "stringValue": s }),
        FieldValue::Timestamp(ts) => json!({ "timestampValue": ts.to_rfc3339()? }),
        FieldValue::GeoPoint {
            latitude,
            longitude,
        } => json!({ "geoPointValue": { "latitude": latitude, "longitude": longitude } }),
        FieldValue::Reference(path) => {
            json!({ "referenceValue": format!("{database_name}/documents/{path}") })
        }
        FieldValue::Bytes(bytes) => json!({ "bytesValue": BASE64.encode(bytes) }),
        FieldValue::Array(values) => {
            let encoded = values
                .iter()
                .map(|v| encode_value(v, database_name))
                .collect::<Result<Vec<Value>>>()?;
            json!({ "arrayValue": { "values": encoded } })
        }
        FieldValue::Map(fields) => {
            json!({ "mapValue": { "fields": encode_fields(fields, database_name)? } })
        }
    })
}

/// Encodes a field map as Firestore's `fields` object.
///
/// # Errors
///
/// Fails on the first value [`encode_value`] rejects.
pub fn encode_fields(fields: &Fields, database_name: &str) -> Result<Value> {
    fields
        .iter()
        .map(|(k, v)| Ok((k.clone(), encode_value(v, database_name)?)))
        .collect::<Result<Map<String, Value>>>()
        .map(Value::Object)
}

/// Decodes a Firestore typed JSON value.
pub fn decode_value(value: &Value, database_name: &str) -> Result<FieldValue> {
    let invalid = |what: &str| Error::InvalidDocument(format!("{what}: {value}"));
    let Some((kind, inner)) = value.as_object().and_then(|m| m.iter().next()) else {
        return Err(invalid("expected a typed value object"));
    };

    Ok(match kind.as_str() {
        "nullValue" => FieldValue::Null,
        "booleanValue" => FieldValue::Boolean(inner.as_bool().ok_or_else(|| invalid("bad boolean"))?),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().ok(),
                other => other.as_i64(),
            };
            FieldValue::Integer(parsed.ok_or_else(|| invalid("bad integer"))?)
        }
        "doubleValue" => FieldValue::Double(match inner {
            Value::String(s) if s == "NaN" => f64::NAN,
            Value::String(s) if s == "Infinity" => f64::INFINITY,
            Value::String(s) if s == "-Infinity" => f64::NEG_INFINITY,
            other => other.as_f64().ok_or_else(|| invalid("bad double"))?,
        }),
        "stringValue" => FieldValue::String(
            inner
                .as_str()
                .ok_or_else(|| invalid("bad string"))?
                .to_string(),
        ),
        "timestampValue" => FieldValue::Timestamp(Timestamp::parse_rfc3339(
            inner.as_str().ok_or_else(|| invalid("bad timestamp"))?,
        )?),
        "geoPointValue" => FieldValue::GeoPoint {
            latitude: inner.get("latitude").and_then(Value::as_f64).unwrap_or(0.0),
            longitude: inner.get("longitude").and_then(Value::as_f64).unwrap_or(0.0),
        },
        "referenceValue" => {
            let name = inner.as_str().ok_or_else(|| invalid("bad reference"))?;
            let prefix = format!("{database_name}/documents/");
            FieldValue::Reference(name.strip_prefix(&prefix).unwrap_or(name).to_string())
        }
        "bytesValue" => FieldValue::Bytes(
            BASE64
                .decode(inner.as_str().ok_or_else(|| invalid("bad bytes"))?)
                .map_err(|_| invalid("bad base64 bytes"))?,
        ),
        "arrayValue" => FieldValue::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .map(|v| decode_value(v, database_name))
                        .collect::<Result<Vec<_>>>()
                })
                .transpose()?
                .unwrap_or_default(),
        ),
        "mapValue" => FieldValue::Map(decode_fields(inner.get("fields"), database_name)?),
        other => return Err(invalid(&format!("unknown value kind '{other}'"))),
    })
}

/// Decodes Firestore's `fields` object. Absent means no fields.
pub fn decode_fields(fields: Option<&Value>, database_name: &str) -> Result<Fields> {
    match fields {
        None | Some(Value::Null) => Ok(Fields::new()),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), decode_value(v, database_name)?)))
            .collect(),
        Some(other) => Err(Error::InvalidDocument(format!(
            "fields is not an object: {other}"
        ))),
    }
}

/// Decodes a Firestore document resource into a [`Document`].
pub fn decode_document(raw: &Value, database_name: &str) -> Result<Document> {
    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidDocument("document without name".to_string()))?;
    let id = name.rsplit('/').next().unwrap_or(name);
    Ok(Document::new(
        id,
        decode_fields(raw.get("fields"), database_name)?,
    ))
}

#[cfg(test)]
#[path = "firestore_tests.rs"]
mod tests;
