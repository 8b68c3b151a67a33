//! facetag-core: face analysis models and identity matching.
//!
//! SCRFD detection, ArcFace embeddings and attribute models run via ONNX
//! Runtime; the descriptor store and matcher are plain data and functions.

pub mod alignment;
pub mod analyzer;
pub mod attributes;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod store;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, ModelPaths};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use store::{DescriptorStore, EntryOrigin, StoreEntry, StoreSummary};
pub use types::{
    BoundingBox, DetectionResult, Embedding, Expression, ExpressionScore, ExpressionScores,
    FaceDetection, FaceMatch, Gender, LabeledDescriptor, UNKNOWN_LABEL,
};
