//! Fakes shared by the unit tests of this crate.

use crate::engine::{EngineError, EngineFuture, InferenceEngine};
use crate::frame::{Frame, FrameSource};
use crate::overlay::{Canvas, DisplaySize};
use facetag_core::{
    BoundingBox, Embedding, Expression, ExpressionScore, ExpressionScores, FaceDetection, Gender,
};
use image::{Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// A 4×4 image whose red channel identifies it to [`FakeEngine`].
pub fn tagged_image(tag: u8) -> Arc<RgbImage> {
    Arc::new(RgbImage::from_pixel(4, 4, Rgb([tag, 0, 0])))
}

pub fn face(values: &[f32]) -> FaceDetection {
    face_at(values, 10.0, 20.0, 30.0, 40.0)
}

pub fn face_at(values: &[f32], x: f32, y: f32, width: f32, height: f32) -> FaceDetection {
    FaceDetection {
        bounding_box: BoundingBox {
            x, y, width, height, confidence: 0.99, landmarks: None,
        },
        embedding: Embedding::new(values.to_vec()),
        age: 31.4,
        gender: Gender::Female,
        expressions: ExpressionScores(vec![
            ExpressionScore { expression: Expression::Neutral, probability: 0.2 },
            ExpressionScore { expression: Expression::Happy, probability: 0.7 },
            ExpressionScore { expression: Expression::Sad, probability: 0.1 },
        ]),
    }
}

#[derive(Clone)]
enum FakeResponse {
    Faces(Vec<FaceDetection>),
    Failure,
    Fatal,
}

#[derive(Default)]
pub struct CallStats {
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl CallStats {
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Calls that got past the gate and produced an answer.
    pub fn answered(&self) -> usize {
        self.calls.load(Ordering::SeqCst).saturating_sub(self.in_flight())
    }

    /// Sleep in 1 ms steps until `n` calls are parked at the gate.
    pub async fn wait_in_flight(&self, n: usize) {
        for _ in 0..5_000 {
            if self.in_flight() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {n} calls in flight, saw {}", self.in_flight());
    }
}

/// Engine whose answers are keyed by [`tagged_image`] tags.
///
/// With a gate, every call waits for one permit before answering, which
/// lets tests hold inference "in flight" for as long as they need.
#[derive(Default)]
pub struct FakeEngine {
    responses: Mutex<HashMap<u8, FakeResponse>>,
    gate: Option<Arc<Semaphore>>,
    ungated: Mutex<HashSet<u8>>,
    pub stats: Arc<CallStats>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let engine = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (engine, gate)
    }

    pub fn with_faces(self, tag: u8, faces: Vec<FaceDetection>) -> Self {
        self.set(tag, FakeResponse::Faces(faces));
        self
    }

    pub fn with_failure(self, tag: u8) -> Self {
        self.set(tag, FakeResponse::Failure);
        self
    }

    pub fn with_fatal(self, tag: u8) -> Self {
        self.set(tag, FakeResponse::Fatal);
        self
    }

    /// Answer `tag` right away even when the engine is gated.
    pub fn ungated(self, tag: u8) -> Self {
        self.ungated.lock().unwrap().insert(tag);
        self
    }

    fn set(&self, tag: u8, response: FakeResponse) {
        self.responses.lock().unwrap().insert(tag, response);
    }

    fn respond(&self, image: &RgbImage) -> EngineFuture<Vec<FaceDetection>> {
        let tag = image.get_pixel(0, 0)[0];
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&tag)
            .cloned()
            .unwrap_or(FakeResponse::Faces(Vec::new()));

        let stats = self.stats.clone();
        stats.calls.fetch_add(1, Ordering::SeqCst);
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = if self.ungated.lock().unwrap().contains(&tag) {
            None
        } else {
            self.gate.clone()
        };
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            stats.in_flight.fetch_sub(1, Ordering::SeqCst);
            match response {
                FakeResponse::Faces(faces) => Ok(faces),
                FakeResponse::Failure => Err(EngineError::Inference("fake failure".into())),
                FakeResponse::Fatal => Err(EngineError::Unavailable),
            }
        })
    }
}

impl InferenceEngine for FakeEngine {
    fn detect_all(&self, image: Arc<RgbImage>) -> EngineFuture<Vec<FaceDetection>> {
        self.respond(&image)
    }

    fn detect_single(&self, image: Arc<RgbImage>) -> EngineFuture<Option<FaceDetection>> {
        let all = self.respond(&image);
        Box::pin(async move { Ok(all.await?.into_iter().next()) })
    }
}

/// Source that always shows the same tagged image.
pub struct StaticSource {
    pub image: Arc<RgbImage>,
    pub display: DisplaySize,
    pub ready: bool,
}

impl StaticSource {
    pub fn new(tag: u8, display: DisplaySize) -> Self {
        Self {
            image: tagged_image(tag),
            display,
            ready: true,
        }
    }
}

impl FrameSource for StaticSource {
    fn display_size(&self) -> Option<DisplaySize> {
        self.ready.then_some(self.display)
    }

    fn capture(&mut self) -> Option<Frame> {
        self.ready.then(|| Frame::new(self.image.clone(), self.display))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasOp {
    Resize(DisplaySize),
    Clear,
    Box(String),
    Text(Vec<String>),
}

/// Canvas that records every call; clones share one log.
#[derive(Clone, Default)]
pub struct RecordingCanvas {
    pub ops: Arc<Mutex<Vec<CanvasOp>>>,
}

impl RecordingCanvas {
    pub fn ops(&self) -> Vec<CanvasOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn boxes(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                CanvasOp::Box(label) => Some(label),
                _ => None,
            })
            .collect()
    }

    pub fn reset(&self) {
        self.ops.lock().unwrap().clear();
    }
}

impl Canvas for RecordingCanvas {
    fn resize(&mut self, size: DisplaySize) {
        self.ops.lock().unwrap().push(CanvasOp::Resize(size));
    }

    fn clear(&mut self) {
        self.ops.lock().unwrap().push(CanvasOp::Clear);
    }

    fn draw_box(&mut self, _bbox: &BoundingBox, label: &str) {
        self.ops.lock().unwrap().push(CanvasOp::Box(label.to_string()));
    }

    fn draw_text(&mut self, _anchor: (f32, f32), lines: &[String]) {
        self.ops.lock().unwrap().push(CanvasOp::Text(lines.to_vec()));
    }
}
