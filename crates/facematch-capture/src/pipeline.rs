use crate::decode::decode_upright;
use crate::detector::{FaceDetector, FaceRegion};
use crate::embedder::{EmbedderSettings, FaceEmbedder};
use facematch_core::{CaptureError, CapturePipeline, Embedding, FacePatch};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::{Path, PathBuf};

pub const DEFAULT_DETECTOR_MODEL: &str = "det_10g.onnx";
pub const DEFAULT_EMBEDDER_MODEL: &str = "facenet512.onnx";

/// Model locations and embedder parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub detector_model: PathBuf,
    pub embedder_model: PathBuf,
    pub embedder: EmbedderSettings,
}

impl CaptureSettings {
    /// Default model file names inside `model_dir`.
    pub fn in_dir(model_dir: &Path) -> Self {
        Self {
            detector_model: model_dir.join(DEFAULT_DETECTOR_MODEL),
            embedder_model: model_dir.join(DEFAULT_EMBEDDER_MODEL),
            embedder: EmbedderSettings::default(),
        }
    }
}

/// Detector + embedder loaded from ONNX files.
pub struct OnnxPipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxPipeline {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(settings: &CaptureSettings) -> Result<Self, CaptureError> {
        let detector = FaceDetector::load(&settings.detector_model)?;
        let embedder = FaceEmbedder::load(&settings.embedder_model, settings.embedder.clone())?;
        Ok(Self { detector, embedder })
    }
}

impl CapturePipeline for OnnxPipeline {
    fn extract_face(&mut self, image: &[u8]) -> Result<FacePatch, CaptureError> {
        let rgb = decode_upright(image)?;
        let faces = self.detector.detect(&rgb)?;
        let best = faces.first().ok_or(CaptureError::NoFaceDetected)?;
        tracing::debug!(
            confidence = best.confidence,
            x = best.x,
            y = best.y,
            width = best.width,
            height = best.height,
            "face selected"
        );
        crop_face(&rgb, best, self.embedder.settings().input_size)
    }

    fn embed(&mut self, face: &FacePatch) -> Result<Embedding, CaptureError> {
        Ok(self.embedder.embed(face)?)
    }
}

/// Cut `region` out of `image`, clamped to the image bounds, and resize it to
/// a `size` x `size` square.
pub fn crop_face(image: &RgbImage, region: &FaceRegion, size: u32) -> Result<FacePatch, CaptureError> {
    let (w, h) = image.dimensions();
    let clamp_x = |v: f32| v.clamp(0.0, w as f32).round() as u32;
    let clamp_y = |v: f32| v.clamp(0.0, h as f32).round() as u32;

    let (x0, x1) = (clamp_x(region.x), clamp_x(region.x + region.width));
    let (y0, y1) = (clamp_y(region.y), clamp_y(region.y + region.height));
    if x1 <= x0 || y1 <= y0 {
        return Err(CaptureError::NoFaceDetected);
    }

    let crop = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    let resized = imageops::resize(&crop, size, size, FilterType::Triangle);
    Ok(FacePatch {
        width: size,
        height: size,
        pixels: resized.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn region(x: f32, y: f32, w: f32, h: f32) -> FaceRegion {
        FaceRegion { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_crop_face_resizes_to_square() {
        let mut image = RgbImage::from_pixel(100, 80, Rgb([0, 0, 0]));
        for y in 20..60 {
            for x in 30..70 {
                image.put_pixel(x, y, Rgb([200, 100, 50]));
            }
        }
        let face = crop_face(&image, &region(30.0, 20.0, 40.0, 40.0), 16).unwrap();
        assert_eq!((face.width, face.height), (16, 16));
        assert_eq!(face.pixels.len(), 16 * 16 * 3);
        assert_eq!(&face.pixels[..3], &[200, 100, 50]);
    }

    #[test]
    fn test_crop_face_clamps_negative_origin() {
        let image = RgbImage::from_pixel(50, 50, Rgb([9, 9, 9]));
        let face = crop_face(&image, &region(-10.0, -5.0, 30.0, 30.0), 8).unwrap();
        assert_eq!(face.pixels.len(), 8 * 8 * 3);
    }

    #[test]
    fn test_crop_face_outside_image_is_no_face() {
        let image = RgbImage::new(50, 50);
        assert_eq!(
            crop_face(&image, &region(60.0, 60.0, 10.0, 10.0), 8),
            Err(CaptureError::NoFaceDetected)
        );
    }

    #[test]
    fn test_settings_in_dir() {
        let s = CaptureSettings::in_dir(Path::new("/models"));
        assert_eq!(s.detector_model, Path::new("/models/det_10g.onnx"));
        assert_eq!(s.embedder_model, Path::new("/models/facenet512.onnx"));
        assert_eq!(s.embedder.input_size, 160);
    }

    #[test]
    fn test_load_missing_models() {
        let s = CaptureSettings::in_dir(Path::new("/nonexistent/facematch-models"));
        assert!(matches!(OnnxPipeline::load(&s), Err(CaptureError::ModelNotFound(_))));
    }
}
