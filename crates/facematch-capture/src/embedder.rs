//! Face embedder via ONNX Runtime.
//!
//! Defaults match a Keras FaceNet export: 160x160 RGB, NHWC, per-image
//! standardization, 512 outputs. ArcFace-style exports use NCHW with fixed
//! scaling and a 112 input; both are configurable.

use crate::ModelError;
use facematch_core::{Embedding, FacePatch};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_INPUT_SIZE: u32 = 160;
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

/// Memory order of the input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

impl FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nchw" => Ok(Self::Nchw),
            "nhwc" => Ok(Self::Nhwc),
            other => Err(format!("unknown tensor layout '{other}' (expected nchw or nhwc)")),
        }
    }
}

/// How raw 0–255 pixel values are scaled before inference.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum PixelScaling {
    /// `(p - mean) / std` for every pixel.
    Fixed { mean: f32, std: f32 },
    /// Standardize by the crop's own mean and standard deviation.
    PerImage,
}

impl FromStr for PixelScaling {
    type Err = String;

    /// `per-image`, or `fixed:<mean>:<std>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("per-image") {
            return Ok(Self::PerImage);
        }
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            ["fixed", mean, std] => {
                let mean = mean.parse().map_err(|e| format!("bad mean '{mean}': {e}"))?;
                let std: f32 = std.parse().map_err(|e| format!("bad std '{std}': {e}"))?;
                if std <= 0.0 {
                    return Err(format!("std must be positive, got {std}"));
                }
                Ok(Self::Fixed { mean, std })
            }
            _ => Err(format!("unknown pixel scaling '{s}' (expected per-image or fixed:<mean>:<std>)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EmbedderSettings {
    /// Side length of the square face crop.
    pub input_size: u32,
    pub layout: TensorLayout,
    pub scaling: PixelScaling,
    /// Expected output length.
    pub dimension: usize,
}

impl Default for EmbedderSettings {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            layout: TensorLayout::Nhwc,
            scaling: PixelScaling::PerImage,
            dimension: DEFAULT_EMBEDDING_DIM,
        }
    }
}

pub struct FaceEmbedder {
    session: Session,
    settings: EmbedderSettings,
}

impl FaceEmbedder {
    /// Load the embedding ONNX model from the given path.
    pub fn load(model_path: &Path, settings: EmbedderSettings) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            input_size = settings.input_size,
            layout = ?settings.layout,
            dimension = settings.dimension,
            "loaded embedding model"
        );

        Ok(Self { session, settings })
    }

    pub fn settings(&self) -> &EmbedderSettings {
        &self.settings
    }

    /// Embed a face crop of `input_size` x `input_size`. The output is raw;
    /// normalization is left to the matcher.
    pub fn embed(&mut self, face: &FacePatch) -> Result<Embedding, ModelError> {
        let input = preprocess(face, &self.settings)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != self.settings.dimension {
            return Err(ModelError::InferenceFailed(format!(
                "expected {}-dim embedding, got {}",
                self.settings.dimension,
                raw.len()
            )));
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}

/// Scale an RGB crop into a batch-of-one tensor in the configured layout.
fn preprocess(face: &FacePatch, settings: &EmbedderSettings) -> Result<Array4<f32>, ModelError> {
    let size = settings.input_size as usize;
    if face.width != settings.input_size
        || face.height != settings.input_size
        || face.pixels.len() != size * size * 3
    {
        return Err(ModelError::InferenceFailed(format!(
            "face crop is {}x{} ({} bytes), model expects {size}x{size} RGB",
            face.width,
            face.height,
            face.pixels.len()
        )));
    }

    let (offset, scale) = match settings.scaling {
        PixelScaling::Fixed { mean, std } => (mean, std),
        PixelScaling::PerImage => {
            let n = face.pixels.len() as f32;
            let mean = face.pixels.iter().map(|&p| p as f32).sum::<f32>() / n;
            let var = face.pixels.iter().map(|&p| (p as f32 - mean).powi(2)).sum::<f32>() / n;
            // Floor the deviation so a flat crop does not divide by zero.
            (mean, var.sqrt().max(1.0 / n.sqrt()))
        }
    };

    let mut tensor = match settings.layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, size, size)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, size, size, 3)),
    };
    for (i, rgb) in face.pixels.chunks_exact(3).enumerate() {
        let (y, x) = (i / size, i % size);
        for (c, &p) in rgb.iter().enumerate() {
            let v = (p as f32 - offset) / scale;
            match settings.layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
            }
        }
    }

    Ok(tensor)
}
