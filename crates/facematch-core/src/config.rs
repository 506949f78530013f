use serde::Deserialize;

/// Default L2 distance cutoff for a positive match.
pub const DEFAULT_THRESHOLD: f32 = 0.97;
/// Output dimension of the reference FaceNet embedder.
pub const DEFAULT_DIMENSION: usize = 512;
/// Model tag written into snapshot metadata.
pub const DEFAULT_MODEL_TAG: &str = "FaceNet";
/// Normalization tag written into snapshot metadata.
pub const DEFAULT_NORMALIZATION_TAG: &str = "L2";

/// Matching parameters shared by every comparison against one registry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Distances strictly below this value are matches.
    pub threshold: f32,
    /// Required length of every stored and probed embedding.
    pub dimension: usize,
    pub model: String,
    pub normalization: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            dimension: DEFAULT_DIMENSION,
            model: DEFAULT_MODEL_TAG.to_string(),
            normalization: DEFAULT_NORMALIZATION_TAG.to_string(),
        }
    }
}

impl MatcherConfig {
    /// Default tags and threshold with a custom embedding dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }
}
