//! Full per-face analysis: detection, embedding, gender/age and expression.

use crate::attributes::{AttributeError, ExpressionClassifier, GenderAgeEstimator};
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, FaceDetection};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("attributes: {0}")]
    Attributes(#[from] AttributeError),
}

/// Locations of the four ONNX models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    pub gender_age: PathBuf,
    pub expression: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside one model directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join("det_10g.onnx"),
            recognizer: dir.join("w600k_r50.onnx"),
            gender_age: dir.join("genderage.onnx"),
            expression: dir.join("emotion-ferplus-8.onnx"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Path)> {
        [
            ("detector", self.detector.as_path()),
            ("recognizer", self.recognizer.as_path()),
            ("gender_age", self.gender_age.as_path()),
            ("expression", self.expression.as_path()),
        ]
        .into_iter()
    }
}

/// Owns every model session. Not `Sync`: callers serialize access.
pub struct FaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    gender_age: GenderAgeEstimator,
    expression: ExpressionClassifier,
}

impl FaceAnalyzer {
    /// Load all models; any missing or broken model fails the whole load.
    pub fn load(paths: &ModelPaths, detection_confidence: f32) -> Result<Self, AnalyzerError> {
        let path = |p: &Path| p.to_string_lossy().into_owned();
        Ok(Self {
            detector: FaceDetector::load(&path(&paths.detector), detection_confidence)?,
            recognizer: FaceRecognizer::load(&path(&paths.recognizer))?,
            gender_age: GenderAgeEstimator::load(&path(&paths.gender_age))?,
            expression: ExpressionClassifier::load(&path(&paths.expression))?,
        })
    }

    /// Analyze every detected face.
    pub fn analyze_all(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>, AnalyzerError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(faces = faces.len(), "analyze_all: detected");

        let mut out = Vec::with_capacity(faces.len());
        for face in faces {
            if face.landmarks.is_none() {
                tracing::warn!(confidence = face.confidence, "skipping face without landmarks");
                continue;
            }
            out.push(self.describe(image, face)?);
        }
        Ok(out)
    }

    /// Analyze the highest-confidence face only; `None` when there is no face.
    pub fn analyze_single(&mut self, image: &RgbImage) -> Result<Option<FaceDetection>, AnalyzerError> {
        let face = self
            .detector
            .detect(image)?
            .into_iter()
            .find(|f| f.landmarks.is_some());
        match face {
            Some(face) => Ok(Some(self.describe(image, face)?)),
            None => Ok(None),
        }
    }

    fn describe(&mut self, image: &RgbImage, face: BoundingBox) -> Result<FaceDetection, AnalyzerError> {
        let embedding = self.recognizer.extract(image, &face)?;
        let (gender, age) = self.gender_age.estimate(image, &face)?;
        let expressions = self.expression.classify(image, &face)?;
        Ok(FaceDetection {
            bounding_box: face,
            embedding,
            age,
            gender,
            expressions,
        })
    }
}
