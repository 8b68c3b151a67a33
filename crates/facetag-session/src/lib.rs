//! facetag-session: live detection, training and overlay orchestration.
//!
//! The session owns the inference engine handle, the shared descriptor
//! store and the capture queue; detection loops run as separate tasks that
//! read store snapshots.

pub mod catalog;
pub mod config;
pub mod detection_loop;
pub mod engine;
pub mod error;
pub mod frame;
pub mod overlay;
pub mod session;
pub mod store;
pub mod training;

#[cfg(test)]
mod testing;

pub use catalog::{Catalog, CatalogError, CatalogIdentity, SEED_LABELS};
pub use config::Config;
pub use detection_loop::{
    spawn_detection_loop, Completion, DetectionLoop, DiscardReason, LoopCommand, LoopHandle,
    LoopPhase, LoopState, TickOutcome,
};
pub use engine::{spawn_engine, EngineError, EngineFuture, EngineHandle, InferenceEngine};
pub use error::SessionError;
pub use frame::{Frame, FrameSource, ImageSequenceSource};
pub use overlay::{annotation_lines, Canvas, DisplaySize, OverlayRenderer, RasterCanvas, TextAnnotation};
pub use session::Session;
pub use store::{bootstrap_load, StoreHandle};
pub use training::{train_from_captures, CaptureError, CaptureQueue, CapturedSample, TrainingReport};
