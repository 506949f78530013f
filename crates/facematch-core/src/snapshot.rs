//! On-disk registry snapshot: a JSON document with `metadata` and
//! `embeddings` sections.
//!
//! ```json
//! {
//!   "metadata": { "total_ids": 1, "embedding_dimension": [512],
//!                 "model": "FaceNet", "normalization": "L2" },
//!   "embeddings": {
//!     "alice": { "embedding": [0.01, ...], "source_file": "alice.jpg",
//!                "embedding_shape": [512] }
//!   }
//! }
//! ```
//!
//! Parsing only checks document structure. Whether records fit a registry
//! (dimension, finiteness) is decided by [`crate::store::EmbeddingStore::load`].

use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Descriptive header. Every field is optional on read, and a field of
/// the wrong type is ignored with a warning rather than failing the load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotMetadata {
    pub total_ids: usize,
    /// Shape of the first stored vector, or `null` for an empty snapshot.
    pub embedding_dimension: Option<Vec<usize>>,
    /// ID photo directory, for snapshots produced by the batch import.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_from: Option<String>,
    pub model: Option<String>,
    pub normalization: Option<String>,
}

impl SnapshotMetadata {
    fn from_value(value: Value) -> Result<Self, StoreError> {
        let Value::Object(mut fields) = value else {
            return Err(StoreError::InvalidSnapshotFormat(
                "'metadata' is not an object".into(),
            ));
        };

        let total_ids = match fields.remove("total_ids") {
            None | Some(Value::Null) => 0,
            Some(v) => v.as_u64().map(|n| n as usize).unwrap_or_else(|| {
                ignored("total_ids", &v);
                0
            }),
        };

        // Written as `[512]`; a bare `512` is accepted too.
        let embedding_dimension = match fields.remove("embedding_dimension") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_u64() {
                Some(d) => Some(vec![d as usize]),
                None => {
                    ignored("embedding_dimension", &Value::Number(n));
                    None
                }
            },
            Some(v) => {
                let shape: Option<Vec<usize>> = v
                    .as_array()
                    .and_then(|dims| dims.iter().map(|d| d.as_u64().map(|d| d as usize)).collect());
                if shape.is_none() {
                    ignored("embedding_dimension", &v);
                }
                shape
            }
        };

        Ok(Self {
            total_ids,
            embedding_dimension,
            created_from: text_field(&mut fields, "created_from"),
            model: text_field(&mut fields, "model"),
            normalization: text_field(&mut fields, "normalization"),
        })
    }
}

fn text_field(fields: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(v) => {
            ignored(key, &v);
            None
        }
    }
}

fn ignored(key: &str, value: &Value) {
    tracing::warn!(field = key, value = %value, "ignoring malformed snapshot metadata field");
}

/// One persisted identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub embedding_shape: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub embeddings: BTreeMap<String, SnapshotRecord>,
}

impl Snapshot {
    /// Parse a snapshot document.
    ///
    /// A missing or malformed `metadata`/`embeddings` section is
    /// [`StoreError::InvalidSnapshotFormat`]; a record whose embedding is not
    /// a numeric array is [`StoreError::CorruptRecord`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, StoreError> {
        let doc: Value = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::InvalidSnapshotFormat(format!("not valid JSON: {e}")))?;
        let Value::Object(mut doc) = doc else {
            return Err(StoreError::InvalidSnapshotFormat(
                "top level is not an object".into(),
            ));
        };

        let metadata = doc.remove("metadata").ok_or_else(|| {
            StoreError::InvalidSnapshotFormat("missing 'metadata' section".into())
        })?;
        let metadata = SnapshotMetadata::from_value(metadata)?;

        let records = match doc.remove("embeddings") {
            Some(Value::Object(records)) => records,
            Some(_) => {
                return Err(StoreError::InvalidSnapshotFormat(
                    "'embeddings' is not an object".into(),
                ))
            }
            None => {
                return Err(StoreError::InvalidSnapshotFormat(
                    "missing 'embeddings' section".into(),
                ))
            }
        };

        let mut embeddings = BTreeMap::new();
        for (name, raw) in records {
            let record: SnapshotRecord =
                serde_json::from_value(raw).map_err(|e| StoreError::CorruptRecord {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            embeddings.insert(name, record);
        }

        Ok(Self {
            metadata,
            embeddings,
        })
    }

    /// Serialize with two-space indentation.
    pub fn to_vec_pretty(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
