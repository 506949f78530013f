use serde::{Deserialize, Serialize};

/// Face embedding vector (512-dimensional for the reference FaceNet model).
///
/// No normalization is assumed: vectors are brought to unit length lazily,
/// at comparison time, by [`crate::similarity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of components.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean (L2) norm, accumulated in f64 so large finite components
    /// do not overflow. Infinite only if the norm itself exceeds `f32::MAX`.
    pub fn norm(&self) -> f32 {
        self.values
            .iter()
            .map(|&x| f64::from(x).powi(2))
            .sum::<f64>()
            .sqrt() as f32
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|x| x.is_finite())
    }
}

/// A registered identity: unique name plus its reference embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub name: String,
    pub embedding: Embedding,
    /// Where the embedding came from (ID photo file name, or `"register"`).
    pub source: String,
}

impl IdentityRecord {
    pub fn new(name: impl Into<String>, embedding: Embedding, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embedding,
            source: source.into(),
        }
    }
}
