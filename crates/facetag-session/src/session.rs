use crate::catalog::Catalog;
use crate::config::Config;
use crate::detection_loop::{annotate, spawn_detection_loop, DetectionLoop, LoopHandle};
use crate::engine::{spawn_engine, InferenceEngine};
use crate::error::SessionError;
use crate::frame::{Frame, FrameSource};
use crate::overlay::{Canvas, DisplaySize, OverlayRenderer};
use crate::store::StoreHandle;
use crate::training::{train_from_captures, CaptureQueue, TrainingReport};
use facetag_core::{DetectionResult, EntryOrigin, EuclideanMatcher, Matcher};
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything a UI talks to: engine, store, capture queue and live loops.
pub struct Session {
    engine: Arc<dyn InferenceEngine>,
    store: StoreHandle,
    matcher: Arc<dyn Matcher + Send + Sync>,
    captures: CaptureQueue,
}

impl Session {
    /// Load models from `config`, then bootstrap the store from its catalog.
    ///
    /// Model loading blocks the calling thread.
    pub async fn start(config: &Config) -> Result<Self, SessionError> {
        let catalog = config.catalog()?;
        let engine = spawn_engine(&config.model_paths(), config.detection_confidence)?;
        let matcher = Arc::new(EuclideanMatcher::new(config.match_threshold));
        Self::with_engine(Arc::new(engine), &catalog, matcher).await
    }

    pub async fn with_engine(
        engine: Arc<dyn InferenceEngine>,
        catalog: &Catalog,
        matcher: Arc<dyn Matcher + Send + Sync>,
    ) -> Result<Self, SessionError> {
        let store = StoreHandle::bootstrap(engine.clone(), catalog).await?;
        let summary = store.summary();
        tracing::info!(
            entries = summary.entries,
            embeddings = summary.embeddings,
            empty = summary.empty_entries,
            "session ready"
        );
        Ok(Self {
            engine,
            store,
            matcher,
            captures: CaptureQueue::new(),
        })
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn captures(&self) -> &CaptureQueue {
        &self.captures
    }

    pub fn captures_mut(&mut self) -> &mut CaptureQueue {
        &mut self.captures
    }

    pub fn submit_capture(&mut self, label: &str, image: Arc<RgbImage>) -> Result<usize, SessionError> {
        Ok(self.captures.submit(label, image)?)
    }

    /// Drain the capture queue, train on it and merge what was learned.
    ///
    /// The queue is emptied even when a fatal engine error aborts the run.
    pub async fn train(&mut self) -> Result<TrainingReport, SessionError> {
        let samples = self.captures.take_all();
        let submitted = samples.len();
        let descriptors = train_from_captures(self.engine.clone(), samples).await?;
        let enrolled = descriptors.len();
        if enrolled > 0 {
            self.store.merge(EntryOrigin::Training, descriptors);
        }
        let report = TrainingReport {
            submitted,
            enrolled,
            skipped: submitted - enrolled,
        };
        tracing::info!(?report, "training finished");
        Ok(report)
    }

    /// Detect, match and draw every face in one still image.
    pub async fn recognize_still<C: Canvas>(
        &self,
        image: Arc<RgbImage>,
        display: DisplaySize,
        renderer: &mut OverlayRenderer<C>,
    ) -> Result<Vec<DetectionResult>, SessionError> {
        let frame = Frame::new(image, display);
        let (sx, sy) = frame.display_scale();
        let faces = self.engine.detect_all(frame.image).await?;

        let snapshot = self.store.snapshot();
        let results: Vec<DetectionResult> = faces
            .into_iter()
            .map(|face| annotate(face, self.matcher.as_ref(), &snapshot).scaled(sx, sy))
            .collect();
        let drawn = renderer.render(display, &results);
        tracing::debug!(faces = results.len(), drawn, "still image recognized");
        Ok(results)
    }

    /// A detection loop sharing this session's engine, store and matcher.
    pub fn live_loop<C: Canvas>(&self, canvas: C) -> DetectionLoop<C> {
        DetectionLoop::new(
            self.engine.clone(),
            self.store.clone(),
            self.matcher.clone(),
            canvas,
        )
    }

    pub fn spawn_live<C, S>(
        &self,
        canvas: C,
        source: S,
        interval: Duration,
    ) -> (LoopHandle, JoinHandle<DetectionLoop<C>>)
    where
        C: Canvas + Send + 'static,
        S: FrameSource + 'static,
    {
        spawn_detection_loop(self.live_loop(canvas), source, interval)
    }
}
