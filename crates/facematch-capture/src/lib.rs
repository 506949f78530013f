//! facematch-capture: face detection and embedding for FaceMatch.
//!
//! SCRFD locates faces, a FaceNet-style network embeds the crop. Both run via
//! ONNX Runtime on the CPU. [`OnnxPipeline`] plugs them into
//! [`facematch_core::CapturePipeline`].

pub mod decode;
pub mod detector;
pub mod embedder;
pub mod pipeline;

pub use detector::{FaceDetector, FaceRegion};
pub use embedder::{EmbedderSettings, FaceEmbedder, PixelScaling, TensorLayout};
pub use pipeline::{CaptureSettings, OnnxPipeline};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} (place the ONNX model in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ModelError> for facematch_core::CaptureError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::ModelNotFound(path) => Self::ModelNotFound(path),
            other => Self::InferenceFailed(other.to_string()),
        }
    }
}
