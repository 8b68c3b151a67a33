//! Live detection loop.
//!
//! One tokio task owns the loop state, the overlay and the single in-flight
//! inference call. Commands, ticks and inference completion are multiplexed
//! with `tokio::select!`, so every state change and every draw happens on
//! that task and needs no locking.
//!
//! Each effective toggle bumps the generation. An inference call remembers
//! the generation it was launched under; a completion from an older
//! generation is dropped without drawing.

use crate::engine::{EngineError, EngineFuture, InferenceEngine};
use crate::error::SessionError;
use crate::frame::FrameSource;
use crate::overlay::{Canvas, DisplaySize, OverlayRenderer};
use crate::store::StoreHandle;
use facetag_core::{DescriptorStore, DetectionResult, FaceDetection, Matcher};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const COMMAND_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopPhase {
    /// Video off.
    Idle,
    /// Video on, detection off.
    Armed,
    /// Video and detection on.
    Running,
}

/// Visible toggles plus the generation counter.
///
/// `detect_enabled` implies `video_enabled`; the transitions below are the
/// only way to change either flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopState {
    video_enabled: bool,
    detect_enabled: bool,
    runtime_armed: bool,
    generation: u64,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            video_enabled: false,
            detect_enabled: false,
            runtime_armed: true,
            generation: 0,
        }
    }
}

impl LoopState {
    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn detect_enabled(&self) -> bool {
        self.detect_enabled
    }

    pub fn runtime_armed(&self) -> bool {
        self.runtime_armed
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> LoopPhase {
        match (self.video_enabled, self.detect_enabled) {
            (false, _) => LoopPhase::Idle,
            (true, false) => LoopPhase::Armed,
            (true, true) => LoopPhase::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase() == LoopPhase::Running
    }

    /// Flip video. Turning video off also turns detection off.
    pub fn toggle_video(&mut self) {
        self.video_enabled = !self.video_enabled;
        if !self.video_enabled {
            self.detect_enabled = false;
        }
        self.generation += 1;
    }

    /// Flip detection. Returns `false` (and changes nothing) while video is off.
    pub fn toggle_detect(&mut self) -> bool {
        if !self.video_enabled {
            return false;
        }
        self.detect_enabled = !self.detect_enabled;
        self.generation += 1;
        true
    }

    /// Pause or resume frame scheduling without touching the visible toggles.
    pub fn set_armed(&mut self, armed: bool) {
        self.runtime_armed = armed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    ToggleVideo,
    ToggleDetect,
    /// The display surface changed size.
    Resize,
    SetArmed(bool),
    /// Report the current state without changing it.
    Inspect,
}

pub struct LoopRequest {
    pub command: LoopCommand,
    pub reply: oneshot::Sender<LoopState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Inactive,
    Paused,
    FrameNotReady,
    Busy,
    Launched { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// A toggle happened after launch. Every exit from `Running` is a toggle.
    Superseded,
    SurfaceResized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Rendered { faces: usize },
    Failed,
    Discarded(DiscardReason),
}

/// What a launched call needs to be judged and drawn when it completes.
#[derive(Debug, Clone, Copy)]
struct FlightTag {
    generation: u64,
    surface_epoch: u64,
    display: DisplaySize,
    scale: (f32, f32),
}

struct InFlight {
    tag: FlightTag,
    future: EngineFuture<Vec<FaceDetection>>,
}

pub(crate) fn annotate(
    face: FaceDetection,
    matcher: &dyn Matcher,
    store: &DescriptorStore,
) -> DetectionResult {
    let face_match = matcher.best_match(&face.embedding, store);
    DetectionResult::annotate(face, face_match)
}

pub struct DetectionLoop<C> {
    state: LoopState,
    engine: Arc<dyn InferenceEngine>,
    store: StoreHandle,
    matcher: Arc<dyn Matcher + Send + Sync>,
    renderer: OverlayRenderer<C>,
    in_flight: Option<InFlight>,
    surface_epoch: u64,
    surface_dirty: bool,
    results: watch::Sender<Vec<DetectionResult>>,
}

impl<C: Canvas> DetectionLoop<C> {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        store: StoreHandle,
        matcher: Arc<dyn Matcher + Send + Sync>,
        canvas: C,
    ) -> Self {
        let (results, _rx) = watch::channel(Vec::new());
        Self {
            state: LoopState::default(),
            engine,
            store,
            matcher,
            renderer: OverlayRenderer::new(canvas),
            in_flight: None,
            surface_epoch: 0,
            surface_dirty: true,
            results,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn renderer(&self) -> &OverlayRenderer<C> {
        &self.renderer
    }

    /// Latest drawn result list; emptied whenever the loop leaves `Running`.
    pub fn subscribe_results(&self) -> watch::Receiver<Vec<DetectionResult>> {
        self.results.subscribe()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn apply(&mut self, command: LoopCommand) -> LoopState {
        let was_running = self.state.is_running();
        match command {
            LoopCommand::ToggleVideo => self.state.toggle_video(),
            LoopCommand::ToggleDetect => {
                if !self.state.toggle_detect() {
                    tracing::debug!("detect toggle ignored while video is off");
                }
            }
            LoopCommand::Resize => {
                self.surface_epoch += 1;
                self.surface_dirty = true;
            }
            LoopCommand::SetArmed(armed) => self.state.set_armed(armed),
            LoopCommand::Inspect => {}
        }

        if was_running && !self.state.is_running() {
            self.renderer.clear();
            self.results.send_replace(Vec::new());
        }
        if command != LoopCommand::Inspect {
            tracing::debug!(
                ?command,
                phase = ?self.state.phase(),
                generation = self.state.generation,
                "loop state changed"
            );
        }
        self.state
    }

    /// One scheduling step: launch inference on the current frame if allowed.
    pub fn tick(&mut self, source: &mut dyn FrameSource) -> TickOutcome {
        if !self.state.is_running() {
            return TickOutcome::Inactive;
        }
        if !self.state.runtime_armed {
            return TickOutcome::Paused;
        }
        let display = match source.display_size() {
            Some(size) if !size.is_empty() => size,
            _ => return TickOutcome::FrameNotReady,
        };
        if self.surface_dirty {
            self.renderer.resync(display);
            self.surface_dirty = false;
        }
        if self.in_flight.is_some() {
            return TickOutcome::Busy;
        }
        let Some(frame) = source.capture() else {
            return TickOutcome::FrameNotReady;
        };

        let generation = self.state.generation;
        let tag = FlightTag {
            generation,
            surface_epoch: self.surface_epoch,
            display: frame.display,
            scale: frame.display_scale(),
        };
        let future = self.engine.detect_all(frame.image);
        self.in_flight = Some(InFlight { tag, future });
        tracing::trace!(generation, "inference launched");
        TickOutcome::Launched { generation }
    }

    /// Wait for the in-flight call and handle its result.
    ///
    /// Never resolves while nothing is in flight. Cancel-safe: dropping this
    /// future leaves the call in flight to be awaited again later.
    pub async fn next_completion(&mut self) -> Completion {
        let Some(flight) = self.in_flight.as_mut() else {
            return std::future::pending::<Completion>().await;
        };
        let tag = flight.tag;
        let outcome = flight.future.as_mut().await;
        self.in_flight = None;
        self.finish(tag, outcome)
    }

    fn finish(
        &mut self,
        tag: FlightTag,
        outcome: Result<Vec<FaceDetection>, EngineError>,
    ) -> Completion {
        let discard = if tag.generation != self.state.generation {
            Some(DiscardReason::Superseded)
        } else if tag.surface_epoch != self.surface_epoch {
            Some(DiscardReason::SurfaceResized)
        } else {
            None
        };
        if let Some(reason) = discard {
            tracing::debug!(
                ?reason,
                launched = tag.generation,
                current = self.state.generation,
                "stale inference result discarded"
            );
            return Completion::Discarded(reason);
        }

        let faces = match outcome {
            Ok(faces) => faces,
            Err(e) => {
                if e.is_fatal() {
                    tracing::error!(error = %e, "inference engine unavailable");
                } else {
                    tracing::warn!(error = %e, "frame inference failed, clearing overlay");
                }
                // The previous frame's boxes no longer describe what is on screen.
                self.renderer.render(tag.display, &[]);
                self.results.send_replace(Vec::new());
                return Completion::Failed;
            }
        };

        let snapshot = self.store.snapshot();
        let (sx, sy) = tag.scale;
        let results: Vec<DetectionResult> = faces
            .into_iter()
            .map(|face| annotate(face, self.matcher.as_ref(), &snapshot).scaled(sx, sy))
            .collect();
        let drawn = self.renderer.render(tag.display, &results);
        self.results.send_replace(results);
        Completion::Rendered { faces: drawn }
    }

    /// Serve commands and ticks until every [`LoopHandle`] is dropped.
    pub async fn run(
        &mut self,
        source: &mut dyn FrameSource,
        mut requests: mpsc::Receiver<LoopRequest>,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_ms = interval.as_millis() as u64, "detection loop started");

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(LoopRequest { command, reply }) = request else {
                        break;
                    };
                    let state = self.apply(command);
                    let _ = reply.send(state);
                }
                _ = ticker.tick() => {
                    let outcome = self.tick(source);
                    tracing::trace!(?outcome, "tick");
                }
                completion = self.next_completion(), if self.in_flight.is_some() => {
                    tracing::trace!(?completion, "inference completed");
                }
            }
        }
        tracing::info!("detection loop stopped");
    }
}

/// Async front end of a spawned [`DetectionLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::Sender<LoopRequest>,
    results: watch::Receiver<Vec<DetectionResult>>,
}

impl LoopHandle {
    async fn send(&self, command: LoopCommand) -> Result<LoopState, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LoopRequest { command, reply })
            .await
            .map_err(|_| SessionError::LoopClosed)?;
        rx.await.map_err(|_| SessionError::LoopClosed)
    }

    pub async fn toggle_video(&self) -> Result<LoopState, SessionError> {
        self.send(LoopCommand::ToggleVideo).await
    }

    pub async fn toggle_detect(&self) -> Result<LoopState, SessionError> {
        self.send(LoopCommand::ToggleDetect).await
    }

    pub async fn resize(&self) -> Result<LoopState, SessionError> {
        self.send(LoopCommand::Resize).await
    }

    pub async fn set_armed(&self, armed: bool) -> Result<LoopState, SessionError> {
        self.send(LoopCommand::SetArmed(armed)).await
    }

    pub async fn state(&self) -> Result<LoopState, SessionError> {
        self.send(LoopCommand::Inspect).await
    }

    pub fn results(&self) -> watch::Receiver<Vec<DetectionResult>> {
        self.results.clone()
    }
}

/// Run `detection_loop` on its own task. The task ends, handing the loop
/// back, once every handle clone is dropped.
pub fn spawn_detection_loop<C, S>(
    mut detection_loop: DetectionLoop<C>,
    mut source: S,
    interval: Duration,
) -> (LoopHandle, JoinHandle<DetectionLoop<C>>)
where
    C: Canvas + Send + 'static,
    S: FrameSource + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let handle = LoopHandle {
        tx,
        results: detection_loop.subscribe_results(),
    };
    let task = tokio::spawn(async move {
        detection_loop.run(&mut source, rx, interval).await;
        detection_loop
    });
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face, face_at, CanvasOp, FakeEngine, RecordingCanvas, StaticSource};
    use facetag_core::{EntryOrigin, EuclideanMatcher, LabeledDescriptor, Embedding, UNKNOWN_LABEL};
    use std::sync::atomic::Ordering;

    const DISPLAY: DisplaySize = DisplaySize { width: 4, height: 4 };

    fn store_with(label: &str, values: &[f32]) -> StoreHandle {
        let store = StoreHandle::default();
        store.merge(
            EntryOrigin::Bootstrap,
            vec![LabeledDescriptor::new(label, vec![Embedding::new(values.to_vec())])],
        );
        store
    }

    fn running_loop(engine: FakeEngine) -> (DetectionLoop<RecordingCanvas>, RecordingCanvas) {
        let canvas = RecordingCanvas::default();
        let mut detection_loop = DetectionLoop::new(
            Arc::new(engine),
            store_with("Thor", &[1.0, 0.0]),
            Arc::new(EuclideanMatcher::default()),
            canvas.clone(),
        );
        detection_loop.apply(LoopCommand::ToggleVideo);
        detection_loop.apply(LoopCommand::ToggleDetect);
        assert!(detection_loop.state().is_running());
        (detection_loop, canvas)
    }

    #[test]
    fn test_toggle_video_forces_detect_off() {
        let mut state = LoopState::default();
        assert_eq!(state.phase(), LoopPhase::Idle);
        state.toggle_video();
        assert!(state.toggle_detect());
        assert_eq!(state.phase(), LoopPhase::Running);

        state.toggle_video();
        assert!(!state.video_enabled());
        assert!(!state.detect_enabled());
        assert_eq!(state.generation(), 3);
    }

    #[test]
    fn test_toggle_detect_without_video_is_noop() {
        let mut state = LoopState::default();
        assert!(!state.toggle_detect());
        assert_eq!(state, LoopState::default());
    }

    #[test]
    fn test_set_armed_keeps_visible_state() {
        let mut state = LoopState::default();
        state.toggle_video();
        state.set_armed(false);
        assert_eq!(state.phase(), LoopPhase::Armed);
        assert_eq!(state.generation(), 1);
        assert!(!state.runtime_armed());
    }

    #[tokio::test]
    async fn test_at_most_one_call_in_flight() {
        let (engine, gate) = FakeEngine::gated();
        let engine = engine.with_faces(1, vec![face(&[1.0, 0.0])]);
        let stats = engine.stats.clone();
        let (mut detection_loop, canvas) = running_loop(engine);
        let mut source = StaticSource::new(1, DISPLAY);

        assert!(matches!(detection_loop.tick(&mut source), TickOutcome::Launched { .. }));
        for _ in 0..5 {
            assert_eq!(detection_loop.tick(&mut source), TickOutcome::Busy);
        }
        assert_eq!(stats.calls.load(Ordering::SeqCst), 1);

        gate.add_permits(1);
        assert_eq!(detection_loop.next_completion().await, Completion::Rendered { faces: 1 });
        assert!(!detection_loop.in_flight());
        assert_eq!(canvas.boxes(), vec!["Thor".to_string()]);

        assert!(matches!(detection_loop.tick(&mut source), TickOutcome::Launched { .. }));
        gate.add_permits(1);
        detection_loop.next_completion().await;
        assert_eq!(stats.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(stats.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_toggle_while_pending_suppresses_render() {
        let (engine, gate) = FakeEngine::gated();
        let engine = engine.with_faces(1, vec![face(&[1.0, 0.0])]);
        let (mut detection_loop, canvas) = running_loop(engine);
        let mut source = StaticSource::new(1, DISPLAY);

        detection_loop.tick(&mut source);
        detection_loop.apply(LoopCommand::ToggleDetect);
        detection_loop.apply(LoopCommand::ToggleDetect);
        assert!(detection_loop.state().is_running());
        // The old call still occupies the slot.
        assert_eq!(detection_loop.tick(&mut source), TickOutcome::Busy);
        canvas.reset();

        gate.add_permits(1);
        assert_eq!(
            detection_loop.next_completion().await,
            Completion::Discarded(DiscardReason::Superseded)
        );
        assert!(canvas.boxes().is_empty());
        assert!(matches!(detection_loop.tick(&mut source), TickOutcome::Launched { .. }));
    }

    #[tokio::test]
    async fn test_leaving_running_clears_overlay_and_results() {
        let engine = FakeEngine::new().with_faces(1, vec![face(&[1.0, 0.0])]);
        let (mut detection_loop, canvas) = running_loop(engine);
        let results = detection_loop.subscribe_results();
        let mut source = StaticSource::new(1, DISPLAY);

        detection_loop.tick(&mut source);
        detection_loop.next_completion().await;
        assert_eq!(results.borrow().len(), 1);

        canvas.reset();
        let state = detection_loop.apply(LoopCommand::ToggleVideo);
        assert_eq!(state.phase(), LoopPhase::Idle);
        assert_eq!(canvas.ops(), vec![CanvasOp::Clear]);
        assert!(results.borrow().is_empty());
        assert_eq!(detection_loop.tick(&mut source), TickOutcome::Inactive);
    }

    #[tokio::test]
    async fn test_inference_failure_keeps_loop_going() {
        let engine = FakeEngine::new().with_failure(1);
        let (mut detection_loop, canvas) = running_loop(engine);
        let mut source = StaticSource::new(1, DISPLAY);

        detection_loop.tick(&mut source);
        assert_eq!(detection_loop.next_completion().await, Completion::Failed);
        assert!(canvas.boxes().is_empty());
        assert!(matches!(detection_loop.tick(&mut source), TickOutcome::Launched { .. }));
    }

    #[tokio::test]
    async fn test_failed_frame_clears_previous_overlay() {
        let engine = FakeEngine::new().with_faces(1, vec![face(&[1.0, 0.0])]).with_failure(2);
        let (mut detection_loop, canvas) = running_loop(engine);
        let results = detection_loop.subscribe_results();
        let mut good = StaticSource::new(1, DISPLAY);
        let mut bad = StaticSource::new(2, DISPLAY);

        detection_loop.tick(&mut good);
        assert_eq!(detection_loop.next_completion().await, Completion::Rendered { faces: 1 });
        assert_eq!(results.borrow()[0].matched_label, "Thor");

        canvas.reset();
        detection_loop.tick(&mut bad);
        assert_eq!(detection_loop.next_completion().await, Completion::Failed);
        assert_eq!(canvas.ops(), vec![CanvasOp::Resize(DISPLAY), CanvasOp::Clear]);
        assert!(results.borrow().is_empty());

        detection_loop.tick(&mut good);
        assert_eq!(detection_loop.next_completion().await, Completion::Rendered { faces: 1 });
    }

    #[tokio::test]
    async fn test_leaving_running_while_pending_is_superseded() {
        let (engine, gate) = FakeEngine::gated();
        let engine = engine.with_faces(1, vec![face(&[1.0, 0.0])]);
        let (mut detection_loop, canvas) = running_loop(engine);
        let results = detection_loop.subscribe_results();
        let mut source = StaticSource::new(1, DISPLAY);

        detection_loop.tick(&mut source);
        assert_eq!(detection_loop.apply(LoopCommand::ToggleVideo).phase(), LoopPhase::Idle);
        canvas.reset();

        gate.add_permits(1);
        assert_eq!(
            detection_loop.next_completion().await,
            Completion::Discarded(DiscardReason::Superseded)
        );
        assert!(canvas.ops().is_empty());
        assert!(results.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_resize_mid_flight_discards_and_resyncs() {
        let (engine, gate) = FakeEngine::gated();
        let engine = engine.with_faces(1, vec![face(&[1.0, 0.0])]);
        let (mut detection_loop, canvas) = running_loop(engine);
        let mut source = StaticSource::new(1, DISPLAY);

        detection_loop.tick(&mut source);
        detection_loop.apply(LoopCommand::Resize);
        source.display = DisplaySize::new(8, 8);
        canvas.reset();

        // Resync happens on the next tick even while the old call is pending.
        assert_eq!(detection_loop.tick(&mut source), TickOutcome::Busy);
        assert_eq!(
            canvas.ops(),
            vec![CanvasOp::Resize(DisplaySize::new(8, 8)), CanvasOp::Clear]
        );

        gate.add_permits(1);
        assert_eq!(
            detection_loop.next_completion().await,
            Completion::Discarded(DiscardReason::SurfaceResized)
        );
        assert!(canvas.boxes().is_empty());
    }

    #[tokio::test]
    async fn test_not_ready_and_paused_ticks() {
        let (mut detection_loop, _canvas) = running_loop(FakeEngine::new());
        let mut source = StaticSource::new(1, DISPLAY);

        source.ready = false;
        assert_eq!(detection_loop.tick(&mut source), TickOutcome::FrameNotReady);
        source.ready = true;
        source.display = DisplaySize::new(0, 4);
        assert_eq!(detection_loop.tick(&mut source), TickOutcome::FrameNotReady);

        source.display = DISPLAY;
        detection_loop.apply(LoopCommand::SetArmed(false));
        assert_eq!(detection_loop.tick(&mut source), TickOutcome::Paused);
        detection_loop.apply(LoopCommand::SetArmed(true));
        assert!(matches!(detection_loop.tick(&mut source), TickOutcome::Launched { .. }));
    }

    #[tokio::test]
    async fn test_results_are_scaled_and_matched() {
        let engine = FakeEngine::new().with_faces(
            1,
            vec![face_at(&[1.0, 0.0], 1.0, 1.0, 2.0, 2.0), face_at(&[-5.0, 5.0], 0.0, 0.0, 1.0, 1.0)],
        );
        let (mut detection_loop, canvas) = running_loop(engine);
        let results = detection_loop.subscribe_results();
        // 4x4 raster shown at 8x12.
        let mut source = StaticSource::new(1, DisplaySize::new(8, 12));

        detection_loop.tick(&mut source);
        assert_eq!(detection_loop.next_completion().await, Completion::Rendered { faces: 2 });

        let results = results.borrow();
        let thor = &results[0];
        assert_eq!(thor.matched_label, "Thor");
        assert_eq!(
            (thor.bounding_box.x, thor.bounding_box.y, thor.bounding_box.width, thor.bounding_box.height),
            (2.0, 3.0, 4.0, 6.0)
        );
        assert_eq!(results[1].matched_label, UNKNOWN_LABEL);
        assert_eq!(canvas.boxes(), vec!["Thor".to_string(), UNKNOWN_LABEL.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_publishes_results() {
        let engine = FakeEngine::new().with_faces(1, vec![face(&[1.0, 0.0])]);
        let stats = engine.stats.clone();
        let canvas = RecordingCanvas::default();
        let detection_loop = DetectionLoop::new(
            Arc::new(engine),
            store_with("Thor", &[1.0, 0.0]),
            Arc::new(EuclideanMatcher::default()),
            canvas.clone(),
        );
        let (handle, task) =
            spawn_detection_loop(detection_loop, StaticSource::new(1, DISPLAY), Duration::from_millis(33));
        let mut results = handle.results();

        assert_eq!(handle.state().await.unwrap().phase(), LoopPhase::Idle);
        // Detect without video is refused.
        assert_eq!(handle.toggle_detect().await.unwrap().phase(), LoopPhase::Idle);
        handle.toggle_video().await.unwrap();
        let state = handle.toggle_detect().await.unwrap();
        assert_eq!(state.phase(), LoopPhase::Running);
        assert_eq!(state.generation(), 2);

        results.changed().await.unwrap();
        assert_eq!(results.borrow_and_update()[0].matched_label, "Thor");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(stats.calls.load(Ordering::SeqCst) > 1);
        assert_eq!(stats.max_in_flight.load(Ordering::SeqCst), 1);

        let state = handle.toggle_video().await.unwrap();
        assert_eq!(state.phase(), LoopPhase::Idle);
        assert!(results.borrow().is_empty());

        drop(handle);
        let detection_loop = task.await.unwrap();
        assert!(!detection_loop.state().video_enabled());
        assert!(canvas.boxes().iter().all(|label| label == "Thor"));
    }

    #[tokio::test]
    async fn test_closed_loop_reports_error() {
        let (detection_loop, _canvas) = running_loop(FakeEngine::new());
        let (handle, task) =
            spawn_detection_loop(detection_loop, StaticSource::new(1, DISPLAY), Duration::from_millis(10));
        assert!(handle.state().await.unwrap().is_running());

        task.abort();
        let _ = task.await;
        assert!(matches!(handle.toggle_video().await, Err(SessionError::LoopClosed)));
    }
}
