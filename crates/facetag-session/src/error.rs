use crate::catalog::CatalogError;
use crate::engine::EngineError;
use crate::training::CaptureError;
use thiserror::Error;

/// Errors surfaced at the session boundary.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),
    #[error("detection loop is no longer running")]
    LoopClosed,
}
