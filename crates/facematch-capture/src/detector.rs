//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the RGB input to 640x640, decodes the three anchor-free
//! stride heads and suppresses overlapping boxes.

use crate::ModelError;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Face bounding box in source-image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceRegion {
    fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with `other`.
    pub fn iou(&self, other: &FaceRegion) -> f32 {
        let w = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let h = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        let inter = w.max(0.0) * h.max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Mapping between letterboxed model space and the source image.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn to_source(self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// (score output index, bbox output index) for one stride.
type StrideSlots = (usize, usize);

pub struct FaceDetector {
    session: Session,
    slots: [StrideSlots; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(ModelError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }

        let slots = output_slots(&names);
        tracing::info!(path = %model_path.display(), outputs = ?names, ?slots, "loaded SCRFD model");

        Ok(Self { session, slots })
    }

    /// Detect faces, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, ModelError> {
        let (input, letterbox) = letterbox(image);
        let slots = self.slots;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut regions = Vec::new();
        for (&stride, (score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(slots) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;

            regions.extend(decode_stride(
                scores,
                boxes,
                stride,
                letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let kept = non_max_suppression(regions, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = kept.len(), "SCRFD detect");
        Ok(kept)
    }
}

/// Resize into the model square keeping aspect ratio, centre it, and
/// normalize to NCHW. Padding is zero after normalization.
fn letterbox(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let size = SCRFD_INPUT_SIZE;
    let (w, h) = image.dimensions();
    let scale = (size as f32 / w.max(1) as f32).min(size as f32 / h.max(1) as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    for (x, y, px) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Map each stride to its (score, bbox) outputs.
///
/// Uses `score_<stride>` / `bbox_<stride>` names when the export has them,
/// otherwise the insightface positional order: scores 0..3, boxes 3..6.
fn output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideSlots>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();

    match named {
        Some(slots) => [slots[0], slots[1], slots[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Decode one stride head into source-space regions above `threshold`.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: Letterbox,
    threshold: f32,
) -> Vec<FaceRegion> {
    let grid_w = SCRFD_INPUT_SIZE as usize / stride;
    let step = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let d = boxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * step;
            let cy = (cell / grid_w) as f32 * step;

            let (x1, y1) = letterbox.to_source(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_source(cx + d[2] * step, cy + d[3] * step);
            Some(FaceRegion {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Greedy NMS: keep the most confident region, drop anything overlapping a
/// kept region by more than `iou_threshold`.
fn non_max_suppression(mut regions: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<FaceRegion> = Vec::new();
    for region in regions {
        if kept.iter().all(|k| k.iou(&region) <= iou_threshold) {
            kept.push(region);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn region(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> FaceRegion {
        FaceRegion { x, y, width: w, height: h, confidence }
    }

    #[test]
    fn test_iou() {
        let a = region(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&region(20.0, 20.0, 5.0, 5.0, 1.0)), 0.0);
        // 5x10 overlap, union 150
        assert!((a.iou(&region(5.0, 0.0, 10.0, 10.0, 1.0)) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_most_confident_of_overlapping() {
        let kept = non_max_suppression(
            vec![
                region(5.0, 5.0, 100.0, 100.0, 0.8),
                region(200.0, 200.0, 50.0, 50.0, 0.7),
                region(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = kept.iter().map(|r| r.confidence).collect();
        assert_eq!(confidences, [0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(non_max_suppression(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_output_slots_named() {
        let names: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(output_slots(&names), [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_output_slots_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (440 + i).to_string()).collect();
        assert_eq!(output_slots(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_letterbox_wide_image() {
        let image = RgbImage::from_pixel(320, 160, Rgb([255, 255, 255]));
        let (tensor, lb) = letterbox(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.scale, 2.0);
        assert_eq!((lb.pad_x, lb.pad_y), (0, 160));
        // Padding rows are zero, image rows carry the normalized pixel value.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 2, 320, 320]] - white).abs() < 0.01);
    }

    #[test]
    fn test_letterbox_maps_back_to_source() {
        let lb = Letterbox { scale: 2.0, pad_x: 0, pad_y: 160 };
        assert_eq!(lb.to_source(200.0, 260.0), (100.0, 50.0));
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let stride = 32;
        let cells = (640 / stride) * (640 / stride) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; cells];
        let mut boxes = vec![0.0f32; cells * 4];
        // Anchor 2 → cell 1 → centre (32, 0).
        scores[2] = 0.9;
        boxes[8..12].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);

        let lb = Letterbox { scale: 1.0, pad_x: 0, pad_y: 0 };
        let found = decode_stride(&scores, &boxes, stride, lb, 0.5);
        assert_eq!(found, vec![region(16.0, 0.0, 32.0, 32.0, 0.9)]);
    }
}
