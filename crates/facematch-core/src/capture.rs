use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Cropped face, RGB8 row-major (`width * height * 3` bytes).
#[derive(Debug, Clone, PartialEq)]
pub struct FacePatch {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Turns encoded image bytes into an embedding.
pub trait CapturePipeline {
    /// Locate the most prominent face and return it as a resized crop.
    fn extract_face(&mut self, image: &[u8]) -> Result<FacePatch, CaptureError>;

    /// Compute the embedding for a face crop.
    fn embed(&mut self, face: &FacePatch) -> Result<Embedding, CaptureError>;

    /// `extract_face` followed by `embed`.
    fn embedding_for(&mut self, image: &[u8]) -> Result<Embedding, CaptureError> {
        let face = self.extract_face(image)?;
        self.embed(&face)
    }
}
