//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. Input frames are
//! RGB and letterboxed into the top-left corner of the 640×640 model input.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Default minimum score for a detection to be kept.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty image")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Mapping between source pixels and model-input pixels.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
}

impl Letterbox {
    fn fit(src_width: u32, src_height: u32) -> Self {
        let scale = (SCRFD_INPUT_SIZE as f32 / src_width as f32)
            .min(SCRFD_INPUT_SIZE as f32 / src_height as f32);
        Self {
            scale,
            width: ((src_width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE),
            height: ((src_height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE),
        }
    }

    fn to_source(self, x: f32, y: f32) -> (f32, f32) {
        (x / self.scale, y / self.scale)
    }
}

/// Which output tensors hold score / bbox / keypoints for each stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputLayout {
    score: [usize; 3],
    bbox: [usize; 3],
    kps: [usize; 3],
}

impl OutputLayout {
    /// Use `score_8`-style names when the export has them, else the usual
    /// positional order (scores, bboxes, keypoints; strides 8/16/32 each).
    fn from_names(names: &[String]) -> Self {
        let position = |prefix: &str, stride: usize| {
            let wanted = format!("{prefix}_{stride}");
            names.iter().position(|n| *n == wanted)
        };
        let lookup = |prefix: &str| -> Option<[usize; 3]> {
            Some([
                position(prefix, SCRFD_STRIDES[0])?,
                position(prefix, SCRFD_STRIDES[1])?,
                position(prefix, SCRFD_STRIDES[2])?,
            ])
        };

        match (lookup("score"), lookup("bbox"), lookup("kps")) {
            (Some(score), Some(bbox), Some(kps)) => Self { score, bbox, kps },
            _ => {
                tracing::debug!(?names, "SCRFD: positional output mapping");
                Self {
                    score: [0, 1, 2],
                    bbox: [3, 4, 5],
                    kps: [6, 7, 8],
                }
            }
        }
    }
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    layout: OutputLayout,
    confidence_threshold: f32,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model with keypoints needs 9 outputs, got {}",
                names.len()
            )));
        }
        let layout = OutputLayout::from_names(&names);

        tracing::info!(path = model_path, outputs = ?names, "loaded SCRFD model");

        Ok(Self {
            session,
            layout,
            confidence_threshold,
        })
    }

    /// Detect faces in an RGB image, sorted by descending confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let (input, letterbox) = preprocess(image);
        let layout = self.layout;
        let threshold = self.confidence_threshold;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(layout.score[pos], "scores")?;
            let bboxes = extract(layout.bbox[pos], "bboxes")?;
            let kps = extract(layout.kps[pos], "kps")?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, letterbox, threshold));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Resize into the top-left of a 640×640 NCHW tensor; the rest stays at the
/// normalized mean (zero).
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let resized = imageops::resize(image, letterbox.width, letterbox.height, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * s;
            let ay = (cell / grid) as f32 * s;

            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.to_source(ax - d[0] * s, ay - d[1] * s);
            let (x2, y2) = letterbox.to_source(ax + d[2] * s, ay + d[3] * s);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.to_source(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
