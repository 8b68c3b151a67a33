//! Per-face attribute models: InsightFace gender/age and FER+ expressions.

use crate::types::{BoundingBox, Expression, ExpressionScore, ExpressionScores, Gender};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const GENDERAGE_INPUT_SIZE: u32 = 96;
/// Crop side relative to the larger box side, as InsightFace does.
const GENDERAGE_CROP_SCALE: f32 = 1.5;
const FERPLUS_INPUT_SIZE: u32 = 64;
const FERPLUS_CROP_SCALE: f32 = 1.0;

#[derive(Error, Debug)]
pub enum AttributeError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the image")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

fn load_session(model_path: &str) -> Result<Session, AttributeError> {
    if !Path::new(model_path).exists() {
        return Err(AttributeError::ModelNotFound(model_path.to_string()));
    }
    Ok(Session::builder()?
        .with_intra_threads(1)?
        .commit_from_file(model_path)?)
}

/// Square crop centered on the face box, clamped to the image, resized to `size`.
fn face_crop(image: &RgbImage, face: &BoundingBox, scale: f32, size: u32) -> Result<RgbImage, AttributeError> {
    let side = face.width.max(face.height) * scale;
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let x0 = (cx - side / 2.0).max(0.0).floor() as u32;
    let y0 = (cy - side / 2.0).max(0.0).floor() as u32;
    let x1 = ((cx + side / 2.0).ceil().max(0.0) as u32).min(image.width());
    let y1 = ((cy + side / 2.0).ceil().max(0.0) as u32).min(image.height());
    if x1 <= x0 || y1 <= y0 {
        return Err(AttributeError::EmptyCrop);
    }

    let crop = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    Ok(imageops::resize(&crop, size, size, FilterType::Triangle))
}

/// InsightFace `genderage.onnx`: outputs `[female, male, age / 100]`.
pub struct GenderAgeEstimator {
    session: Session,
}

impl GenderAgeEstimator {
    pub fn load(model_path: &str) -> Result<Self, AttributeError> {
        let session = load_session(model_path)?;
        tracing::info!(path = model_path, "loaded gender/age model");
        Ok(Self { session })
    }

    pub fn estimate(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<(Gender, f32), AttributeError> {
        let crop = face_crop(image, face, GENDERAGE_CROP_SCALE, GENDERAGE_INPUT_SIZE)?;

        // This export normalizes internally: raw 0–255 RGB in.
        let size = GENDERAGE_INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in crop.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = pixel[c] as f32;
            }
        }

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AttributeError::InferenceFailed(format!("genderage: {e}")))?;
        decode_genderage(raw)
    }
}

fn decode_genderage(raw: &[f32]) -> Result<(Gender, f32), AttributeError> {
    let [female, male, age] = raw else {
        return Err(AttributeError::InferenceFailed(format!(
            "genderage: expected 3 outputs, got {}",
            raw.len()
        )));
    };
    let gender = if male > female { Gender::Male } else { Gender::Female };
    Ok((gender, (age * 100.0).max(0.0)))
}

/// FER+ `emotion-ferplus-8.onnx`: 64×64 grayscale in, 8 logits out.
pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn load(model_path: &str) -> Result<Self, AttributeError> {
        let session = load_session(model_path)?;
        tracing::info!(path = model_path, "loaded FER+ expression model");
        Ok(Self { session })
    }

    pub fn classify(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<ExpressionScores, AttributeError> {
        let crop = face_crop(image, face, FERPLUS_CROP_SCALE, FERPLUS_INPUT_SIZE)?;
        let gray = imageops::grayscale(&crop);

        let size = FERPLUS_INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 1, size, size));
        for (x, y, pixel) in gray.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32;
        }

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AttributeError::InferenceFailed(format!("ferplus: {e}")))?;

        if logits.len() != Expression::ALL.len() {
            return Err(AttributeError::InferenceFailed(format!(
                "ferplus: expected {} logits, got {}",
                Expression::ALL.len(),
                logits.len()
            )));
        }
        Ok(scores_from_logits(logits))
    }
}

fn scores_from_logits(logits: &[f32]) -> ExpressionScores {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exp.iter().sum();

    ExpressionScores(
        Expression::ALL
            .iter()
            .zip(exp)
            .map(|(&expression, e)| ExpressionScore {
                expression,
                probability: e / sum,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: 0.9, landmarks: None,
        }
    }

    #[test]
    fn test_decode_genderage() {
        let (g, age) = decode_genderage(&[0.2, 0.8, 0.31]).unwrap();
        assert_eq!(g, Gender::Male);
        assert!((age - 31.0).abs() < 1e-4);

        let (g, _) = decode_genderage(&[0.9, 0.1, 0.2]).unwrap();
        assert_eq!(g, Gender::Female);

        assert!(decode_genderage(&[0.1, 0.2]).is_err());
    }

    #[test]
    fn test_softmax_scores() {
        let scores = scores_from_logits(&[0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let total: f32 = scores.iter().map(|s| s.probability).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(scores.dominant().unwrap().expression, Expression::Happy);
    }

    #[test]
    fn test_face_crop_clamps_to_image() {
        let image = RgbImage::new(100, 80);
        let crop = face_crop(&image, &face(-10.0, -10.0, 40.0, 40.0), 1.5, 96).unwrap();
        assert_eq!(crop.dimensions(), (96, 96));
    }

    #[test]
    fn test_face_crop_outside_image() {
        let image = RgbImage::new(100, 80);
        let err = face_crop(&image, &face(500.0, 500.0, 20.0, 20.0), 1.0, 64).unwrap_err();
        assert!(matches!(err, AttributeError::EmptyCrop));
    }
}
