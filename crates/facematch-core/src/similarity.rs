use crate::types::Embedding;
use std::borrow::Cow;
use thiserror::Error;

/// A vector whose norm is within this distance of 1.0 is treated as already
/// unit-normalized and left untouched.
pub const NORMALIZATION_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("cannot normalize an embedding with zero norm")]
    ZeroVector,
    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// Outcome of comparing two embeddings against a threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub matched: bool,
    /// L2 distance between the normalized inputs, in [0, 2].
    pub distance: f32,
}

/// Scale `v` to unit length.
///
/// Vectors already within [`NORMALIZATION_TOLERANCE`] of unit length are
/// returned unchanged. A zero vector fails with [`SimilarityError::ZeroVector`].
pub fn normalize(v: &Embedding) -> Result<Embedding, SimilarityError> {
    unit_values(v).map(|values| Embedding::new(values.into_owned()))
}

fn unit_values(v: &Embedding) -> Result<Cow<'_, [f32]>, SimilarityError> {
    let norm = v.norm();
    if !norm.is_finite() {
        return Err(SimilarityError::NonFinite);
    }
    if (norm - 1.0).abs() < NORMALIZATION_TOLERANCE {
        return Ok(Cow::Borrowed(v.values()));
    }
    if norm == 0.0 {
        return Err(SimilarityError::ZeroVector);
    }
    Ok(Cow::Owned(v.values().iter().map(|x| x / norm).collect()))
}

/// Fail unless both embeddings have the same number of components.
pub fn ensure_same_dimension(a: &Embedding, b: &Embedding) -> Result<(), SimilarityError> {
    if a.dim() != b.dim() {
        return Err(SimilarityError::DimensionMismatch {
            expected: a.dim(),
            actual: b.dim(),
        });
    }
    Ok(())
}

/// Euclidean distance between the normalized forms of `a` and `b`.
pub fn distance(a: &Embedding, b: &Embedding) -> Result<f32, SimilarityError> {
    ensure_same_dimension(a, b)?;
    let a = unit_values(a)?;
    let b = unit_values(b)?;

    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// Compare `a` and `b`: a match iff their distance is strictly below `threshold`.
pub fn is_match(a: &Embedding, b: &Embedding, threshold: f32) -> Result<Comparison, SimilarityError> {
    let distance = distance(a, b)?;
    Ok(Comparison {
        matched: distance < threshold,
        distance,
    })
}

/// Linear rescaling of a distance into a 0–100 score for display.
///
/// `max(0, (threshold - distance) / threshold) * 100`. This is not a
/// calibrated probability and plays no part in match decisions.
pub fn similarity_percent(distance: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return 0.0;
    }
    ((threshold - distance) / threshold).max(0.0) * 100.0
}
