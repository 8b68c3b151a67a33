use facetag_core::{AnalyzerError, Embedding, FaceAnalyzer, FaceDetection, ModelPaths};
use image::RgbImage;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Requests that may queue up before the engine thread picks them up.
const ENGINE_QUEUE_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model initialization failed: {0}")]
    Initialization(#[source] AnalyzerError),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("engine thread exited")]
    Unavailable,
}

impl EngineError {
    /// Fatal errors mean no further detection or training can succeed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Inference(_))
    }
}

pub type EngineFuture<T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'static>>;

/// Asynchronous face inference service.
///
/// Calls may take several frame intervals to resolve. The returned futures
/// own everything they need, so callers can hold them across state changes.
pub trait InferenceEngine: Send + Sync {
    /// Every face in a frame.
    fn detect_all(&self, image: Arc<RgbImage>) -> EngineFuture<Vec<FaceDetection>>;

    /// The most confident face, or `None` when there is no face.
    fn detect_single(&self, image: Arc<RgbImage>) -> EngineFuture<Option<FaceDetection>>;
}

/// What single-face detection produced for one image.
#[derive(Debug)]
pub(crate) enum SingleOutcome {
    Face(Embedding),
    NoFace,
    Failed(String),
}

/// Run `detect_single`, folding recoverable errors into [`SingleOutcome::Failed`].
/// Only fatal engine errors come back as `Err`.
pub(crate) async fn detect_one(
    engine: Arc<dyn InferenceEngine>,
    image: Arc<RgbImage>,
) -> Result<SingleOutcome, EngineError> {
    match engine.detect_single(image).await {
        Ok(Some(face)) => Ok(SingleOutcome::Face(face.embedding)),
        Ok(None) => Ok(SingleOutcome::NoFace),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => Ok(SingleOutcome::Failed(e.to_string())),
    }
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    DetectAll {
        image: Arc<RgbImage>,
        reply: oneshot::Sender<Result<Vec<FaceDetection>, EngineError>>,
    },
    DetectSingle {
        image: Arc<RgbImage>,
        reply: oneshot::Sender<Result<Option<FaceDetection>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    fn call<T, F>(&self, make: F) -> EngineFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest + Send + 'static,
    {
        let tx = self.tx.clone();
        Box::pin(async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            tx.send(make(reply_tx))
                .await
                .map_err(|_| EngineError::Unavailable)?;
            reply_rx.await.map_err(|_| EngineError::Unavailable)?
        })
    }
}

impl InferenceEngine for EngineHandle {
    fn detect_all(&self, image: Arc<RgbImage>) -> EngineFuture<Vec<FaceDetection>> {
        self.call(move |reply| EngineRequest::DetectAll { image, reply })
    }

    fn detect_single(&self, image: Arc<RgbImage>) -> EngineFuture<Option<FaceDetection>> {
        self.call(move |reply| EngineRequest::DetectSingle { image, reply })
    }
}

/// Load every model, then serve inference on a dedicated OS thread.
///
/// Model loading happens before this returns, so a missing or broken model
/// fails the session up front instead of on the first frame.
pub fn spawn_engine(paths: &ModelPaths, detection_confidence: f32) -> Result<EngineHandle, EngineError> {
    let mut analyzer =
        FaceAnalyzer::load(paths, detection_confidence).map_err(EngineError::Initialization)?;
    tracing::info!(
        detector = %paths.detector.display(),
        recognizer = %paths.recognizer.display(),
        "face models loaded"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("facetag-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::DetectAll { image, reply } => {
                        let result = analyzer
                            .analyze_all(&image)
                            .map_err(|e| EngineError::Inference(e.to_string()));
                        let _ = reply.send(result);
                    }
                    EngineRequest::DetectSingle { image, reply } => {
                        let result = analyzer
                            .analyze_single(&image)
                            .map_err(|e| EngineError::Inference(e.to_string()));
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face, tagged_image, FakeEngine};

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::Unavailable.is_fatal());
        assert!(!EngineError::Inference("x".into()).is_fatal());
    }

    #[test]
    fn test_spawn_engine_fails_fast_without_models() {
        let paths = ModelPaths::in_dir(std::path::Path::new("/nonexistent-facetag-models"));
        let err = spawn_engine(&paths, 0.5).err().unwrap();
        assert!(matches!(err, EngineError::Initialization(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_closed_engine_is_unavailable() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = EngineHandle { tx };
        let err = handle.detect_all(tagged_image(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Unavailable));
    }

    #[tokio::test]
    async fn test_handle_round_trip_through_worker() {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(1);
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                match req {
                    EngineRequest::DetectAll { reply, .. } => {
                        let _ = reply.send(Ok(vec![face(&[1.0, 0.0])]));
                    }
                    EngineRequest::DetectSingle { reply, .. } => {
                        let _ = reply.send(Ok(None));
                    }
                }
            }
        });
        let handle = EngineHandle { tx };
        assert_eq!(handle.detect_all(tagged_image(1)).await.unwrap().len(), 1);
        assert!(handle.detect_single(tagged_image(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_detect_one_outcomes() {
        let engine = FakeEngine::new()
            .with_faces(1, vec![face(&[0.5, 0.5])])
            .with_failure(2)
            .with_fatal(3);
        let engine: Arc<dyn InferenceEngine> = Arc::new(engine);

        let hit = detect_one(engine.clone(), tagged_image(1)).await.unwrap();
        assert!(matches!(hit, SingleOutcome::Face(e) if e.values == vec![0.5, 0.5]));

        let miss = detect_one(engine.clone(), tagged_image(9)).await.unwrap();
        assert!(matches!(miss, SingleOutcome::NoFace));

        let failed = detect_one(engine.clone(), tagged_image(2)).await.unwrap();
        assert!(matches!(failed, SingleOutcome::Failed(_)));

        assert!(detect_one(engine, tagged_image(3)).await.is_err());
    }
}
