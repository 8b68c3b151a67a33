use serde::{Deserialize, Serialize};
use std::fmt;

/// Label reported when no enrolled identity is close enough to a query.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// True when the box has no drawable area.
    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn bottom_left(&self) -> (f32, f32) {
        (self.x, self.y + self.height)
    }

    /// Scale the box (and its landmarks) by independent per-axis factors.
    pub fn scaled(&self, sx: f32, sy: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * sx, ly * sy))),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different length are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            tracing::warn!(
                left = self.values.len(),
                right = other.values.len(),
                "comparing embeddings of different length"
            );
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => f.write_str("male"),
            Gender::Female => f.write_str("female"),
        }
    }
}

/// Facial expression classes, in the output order of the FER+ model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Surprised,
    Sad,
    Angry,
    Disgusted,
    Fearful,
    Contemptuous,
}

impl Expression {
    pub const ALL: [Expression; 8] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Surprised,
        Expression::Sad,
        Expression::Angry,
        Expression::Disgusted,
        Expression::Fearful,
        Expression::Contemptuous,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Surprised => "surprised",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Disgusted => "disgusted",
            Expression::Fearful => "fearful",
            Expression::Contemptuous => "contemptuous",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpressionScore {
    pub expression: Expression,
    pub probability: f32,
}

/// Probability per expression for one face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionScores(pub Vec<ExpressionScore>);

impl ExpressionScores {
    /// Highest-probability expression; the first maximum wins ties.
    pub fn dominant(&self) -> Option<ExpressionScore> {
        let mut best: Option<ExpressionScore> = None;
        for score in &self.0 {
            match best {
                Some(b) if score.probability <= b.probability => {}
                _ => best = Some(*score),
            }
        }
        best
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExpressionScore> {
        self.0.iter()
    }
}

/// Everything the inference engine reports for one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bounding_box: BoundingBox,
    pub embedding: Embedding,
    pub age: f32,
    pub gender: Gender,
    pub expressions: ExpressionScores,
}

/// A name paired with zero or more embeddings believed to belong to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledDescriptor {
    pub label: String,
    pub embeddings: Vec<Embedding>,
}

impl LabeledDescriptor {
    pub fn new(label: impl Into<String>, embeddings: Vec<Embedding>) -> Self {
        Self {
            label: label.into(),
            embeddings,
        }
    }
}

/// Result of matching a query embedding against the descriptor store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub label: String,
    /// Euclidean distance to the closest enrolled embedding (+inf with no candidates).
    pub distance: f32,
}

impl FaceMatch {
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

/// One annotated face, ready for the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub bounding_box: BoundingBox,
    pub age: f32,
    pub gender: Gender,
    pub dominant_expression: Option<ExpressionScore>,
    pub expressions: ExpressionScores,
    pub matched_label: String,
    pub match_distance: f32,
}

impl DetectionResult {
    pub fn annotate(detection: FaceDetection, face_match: FaceMatch) -> Self {
        Self {
            dominant_expression: detection.expressions.dominant(),
            bounding_box: detection.bounding_box,
            age: detection.age,
            gender: detection.gender,
            expressions: detection.expressions,
            matched_label: face_match.label,
            match_distance: face_match.distance,
        }
    }

    /// Same result with its box expressed in display coordinates.
    pub fn scaled(mut self, sx: f32, sy: f32) -> Self {
        self.bounding_box = self.bounding_box.scaled(sx, sy);
        self
    }
}
