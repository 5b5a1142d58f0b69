//! Loading plant-disease records into [`Document`]s.
//!
//! Accepts a JSON array of flat objects or a JSON Lines file with one object
//! per line. Records either carry ready-made text in a content field or the
//! `crop`, `disease` and `description` columns of the disease dataset, which
//! are rendered into one sentence.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::document::Document;
use crate::error::{RagError, Result};

/// Which record fields feed the document id and text.
#[derive(Debug, Clone)]
pub struct RecordMapping {
    /// Field holding the document id. Without it, ids are `row-{n}` (1-based).
    pub id_field: Option<String>,
    /// Field holding ready-made document text.
    pub content_field: String,
}

impl Default for RecordMapping {
    fn default() -> Self {
        Self { id_field: None, content_field: "page_content".to_string() }
    }
}

impl RecordMapping {
    /// Take document ids from `field`.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    /// Take document text from `field`.
    pub fn with_content_field(mut self, field: impl Into<String>) -> Self {
        self.content_field = field.into();
        self
    }
}

/// Read every record in `path` as a [`Document`].
///
/// # Errors
///
/// Returns [`RagError::Ingestion`] if the file cannot be read, a record is not
/// a JSON object, has no usable text, or repeats an id.
pub async fn load_documents(
    path: impl AsRef<Path>,
    mapping: &RecordMapping,
) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RagError::Ingestion(format!("cannot read {}: {e}", path.display())))?;
    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let records = parse_records(&raw)?;
    let mut seen = HashSet::with_capacity(records.len());
    let mut documents = Vec::with_capacity(records.len());
    for (row, value) in records {
        let mut document = record_to_document(row, value, mapping, &source)?;
        if !seen.insert(document.id.clone()) {
            return Err(RagError::Ingestion(format!(
                "record {row}: duplicate document id '{}'",
                document.id
            )));
        }
        document.source_uri = Some(path.display().to_string());
        documents.push(document);
    }

    info!(path = %path.display(), document_count = documents.len(), "loaded documents");
    Ok(documents)
}

/// Records with their 1-based position (array element or line number).
fn parse_records(raw: &str) -> Result<Vec<(usize, Value)>> {
    if raw.trim_start().starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(raw)
            .map_err(|e| RagError::Ingestion(format!("invalid JSON array: {e}")))?;
        return Ok(values.into_iter().enumerate().map(|(i, v)| (i + 1, v)).collect());
    }

    let mut records = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(line)
            .map_err(|e| RagError::Ingestion(format!("line {}: invalid JSON: {e}", i + 1)))?;
        records.push((i + 1, value));
    }
    Ok(records)
}

fn record_to_document(
    row: usize,
    value: Value,
    mapping: &RecordMapping,
    source: &str,
) -> Result<Document> {
    let Value::Object(fields) = value else {
        return Err(RagError::Ingestion(format!("record {row}: expected a JSON object")));
    };

    let id = mapping
        .id_field
        .as_deref()
        .and_then(|field| fields.get(field))
        .and_then(scalar_to_string)
        .unwrap_or_else(|| format!("row-{row}"));

    let text = match fields.get(&mapping.content_field) {
        Some(Value::String(text)) => text.clone(),
        Some(_) => {
            return Err(RagError::Ingestion(format!(
                "record {row}: field '{}' must be a string",
                mapping.content_field
            )));
        }
        None => render_disease_record(&fields).ok_or_else(|| {
            RagError::Ingestion(format!(
                "record {row}: no '{}' field and no crop/disease/description fields",
                mapping.content_field
            ))
        })?,
    };

    let mut metadata: HashMap<String, String> = fields
        .iter()
        .filter(|(key, _)| **key != mapping.content_field)
        .filter_map(|(key, value)| scalar_to_string(value).map(|v| (key.clone(), v)))
        .collect();
    metadata.entry("source".to_string()).or_insert_with(|| source.to_string());

    debug!(document.id = %id, text_len = text.len(), "parsed record");
    Ok(Document { id, text, metadata, source_uri: None })
}

/// `"Crop: {crop}, Disease: {disease}. Description: {description}"`, with keys
/// matched case-insensitively. `None` if all three are missing.
fn render_disease_record(fields: &Map<String, Value>) -> Option<String> {
    let lookup = |name: &str| {
        fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| scalar_to_string(value))
    };
    let crop = lookup("crop");
    let disease = lookup("disease");
    let description = lookup("description");
    if crop.is_none() && disease.is_none() && description.is_none() {
        return None;
    }
    Some(format!(
        "Crop: {}, Disease: {}. Description: {}",
        crop.unwrap_or_default(),
        disease.unwrap_or_default(),
        description.unwrap_or_default()
    ))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
