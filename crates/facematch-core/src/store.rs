use crate::config::MatcherConfig;
use crate::snapshot::{Snapshot, SnapshotMetadata, SnapshotRecord};
use crate::types::{Embedding, IdentityRecord};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid snapshot format: {0}")]
    InvalidSnapshotFormat(String),
    #[error("corrupt record '{name}': {reason}")]
    CorruptRecord { name: String, reason: String },
    #[error("identity name must not be empty")]
    InvalidName,
    #[error("embedding for '{name}' has {actual} dimensions, registry expects {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("embedding for '{name}' contains non-finite values or its norm overflows")]
    NonFinite { name: String },
    #[error("embedding for '{name}' is the zero vector")]
    ZeroNorm { name: String },
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Name → identity mapping plus the tags written into its snapshots.
///
/// Ordered by name, so recognition ties go to the lexicographically first
/// name. Every record has the configured dimension and a finite, non-zero norm.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    dimension: usize,
    model: String,
    normalization: String,
    created_from: Option<String>,
    records: BTreeMap<String, IdentityRecord>,
}

impl EmbeddingStore {
    /// Empty store accepting embeddings of `config.dimension`.
    pub fn new(config: &MatcherConfig) -> Self {
        Self {
            dimension: config.dimension,
            model: config.model.clone(),
            normalization: config.normalization.clone(),
            created_from: None,
            records: BTreeMap::new(),
        }
    }

    /// Build a store from a parsed snapshot. All or nothing: the first
    /// record that does not fit fails the whole load with
    /// [`StoreError::CorruptRecord`].
    pub fn load(snapshot: Snapshot, config: &MatcherConfig) -> Result<Self, StoreError> {
        let Snapshot {
            metadata,
            embeddings,
        } = snapshot;

        if let Some(model) = metadata.model.as_deref() {
            if model != config.model {
                tracing::warn!(
                    snapshot_model = model,
                    configured_model = %config.model,
                    "snapshot was produced by a different model"
                );
            }
        }

        let mut store = Self::new(config);
        store.created_from = metadata.created_from;

        for (name, record) in embeddings {
            if !record.embedding_shape.is_empty() {
                let expected: usize = record.embedding_shape.iter().product();
                if expected != record.embedding.len() {
                    return Err(StoreError::CorruptRecord {
                        reason: format!(
                            "embedding_shape {:?} does not match {} values",
                            record.embedding_shape,
                            record.embedding.len()
                        ),
                        name,
                    });
                }
            }

            let identity =
                IdentityRecord::new(name, Embedding::new(record.embedding), record.source_file);
            store.put(identity).map_err(|e| match e {
                StoreError::InvalidName => StoreError::CorruptRecord {
                    name: String::new(),
                    reason: e.to_string(),
                },
                StoreError::DimensionMismatch { ref name, .. }
                | StoreError::NonFinite { ref name }
                | StoreError::ZeroNorm { ref name } => {
                    StoreError::CorruptRecord {
                        name: name.clone(),
                        reason: e.to_string(),
                    }
                }
                other => other,
            })?;
        }

        if metadata.total_ids != store.len() {
            tracing::warn!(
                declared = metadata.total_ids,
                actual = store.len(),
                "snapshot metadata count disagrees with records"
            );
        }

        tracing::debug!(count = store.len(), dimension = store.dimension, "registry loaded");
        Ok(store)
    }

    /// Parse and load snapshot bytes in one step.
    pub fn from_slice(bytes: &[u8], config: &MatcherConfig) -> Result<Self, StoreError> {
        Self::load(Snapshot::from_slice(bytes)?, config)
    }

    /// Insert or overwrite the record for `record.name`, returning the
    /// previous record. The embedding is stored as given; normalization
    /// happens at comparison time, so it must have a finite, non-zero norm.
    pub fn put(&mut self, record: IdentityRecord) -> Result<Option<IdentityRecord>, StoreError> {
        if record.name.is_empty() {
            return Err(StoreError::InvalidName);
        }
        if record.embedding.dim() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                name: record.name,
                expected: self.dimension,
                actual: record.embedding.dim(),
            });
        }
        let norm = record.embedding.norm();
        if !record.embedding.is_finite() || !norm.is_finite() {
            return Err(StoreError::NonFinite { name: record.name });
        }
        if norm == 0.0 {
            return Err(StoreError::ZeroNorm { name: record.name });
        }
        Ok(self.records.insert(record.name.clone(), record))
    }

    /// Serialize the current state. `embedding_dimension` describes the first
    /// record in name order and is `null` for an empty store.
    pub fn to_snapshot(&self) -> Snapshot {
        let embeddings: BTreeMap<String, SnapshotRecord> = self
            .records
            .values()
            .map(|r| {
                (
                    r.name.clone(),
                    SnapshotRecord {
                        embedding: r.embedding.values().to_vec(),
                        source_file: r.source.clone(),
                        embedding_shape: vec![r.embedding.dim()],
                    },
                )
            })
            .collect();

        Snapshot {
            metadata: SnapshotMetadata {
                total_ids: embeddings.len(),
                embedding_dimension: embeddings.values().next().map(|r| r.embedding_shape.clone()),
                created_from: self.created_from.clone(),
                model: Some(self.model.clone()),
                normalization: Some(self.normalization.clone()),
            },
            embeddings,
        }
    }

    pub fn get(&self, name: &str) -> Option<&IdentityRecord> {
        self.records.get(name)
    }

    /// Records in name order.
    pub fn iter(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.records.values()
    }

    /// Registered names in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Record the directory this registry was imported from.
    pub fn set_created_from(&mut self, origin: impl Into<String>) {
        self.created_from = Some(origin.into());
    }
}
