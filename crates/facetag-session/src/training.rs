//! Capture queue and the training pipeline that turns captures into descriptors.

use crate::engine::{detect_one, EngineError, InferenceEngine, SingleOutcome};
use facetag_core::{Embedding, LabeledDescriptor};
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture label is empty")]
    EmptyLabel,
    #[error("capture index {index} out of range (queue holds {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// An image captured for training, tagged with the identity it shows.
#[derive(Debug, Clone)]
pub struct CapturedSample {
    pub label: String,
    pub image: Arc<RgbImage>,
}

/// Captured samples waiting to be trained, in capture order.
#[derive(Debug, Default)]
pub struct CaptureQueue {
    samples: Vec<CapturedSample>,
}

impl CaptureQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a sample. The label is trimmed; blank labels are rejected.
    pub fn submit(&mut self, label: &str, image: Arc<RgbImage>) -> Result<usize, CaptureError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(CaptureError::EmptyLabel);
        }
        self.samples.push(CapturedSample {
            label: label.to_string(),
            image,
        });
        tracing::debug!(label, queued = self.samples.len(), "capture queued");
        Ok(self.samples.len())
    }

    pub fn remove_at(&mut self, index: usize) -> Result<CapturedSample, CaptureError> {
        if index >= self.samples.len() {
            return Err(CaptureError::IndexOutOfRange {
                index,
                len: self.samples.len(),
            });
        }
        Ok(self.samples.remove(index))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&CapturedSample> {
        self.samples.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapturedSample> {
        self.samples.iter()
    }

    /// Empty the queue, handing every sample over in capture order.
    pub fn take_all(&mut self) -> Vec<CapturedSample> {
        std::mem::take(&mut self.samples)
    }
}

/// Outcome of one training run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrainingReport {
    pub submitted: usize,
    pub enrolled: usize,
    pub skipped: usize,
}

/// Run single-face detection on every sample concurrently.
///
/// Produces one single-embedding descriptor per sample that yielded a face,
/// in sample order. Labels are not deduplicated. A sample whose inference
/// fails counts as faceless; only a fatal engine error aborts the batch.
pub async fn train_from_captures(
    engine: Arc<dyn InferenceEngine>,
    samples: Vec<CapturedSample>,
) -> Result<Vec<LabeledDescriptor>, EngineError> {
    let total = samples.len();
    let mut labels = Vec::with_capacity(total);
    let mut tasks = JoinSet::new();
    for (index, CapturedSample { label, image }) in samples.into_iter().enumerate() {
        let engine = engine.clone();
        tasks.spawn(async move { (index, detect_one(engine, image).await) });
        labels.push(label);
    }

    // Dropping the set on a fatal error aborts whatever is still running.
    let mut outcomes: Vec<Option<SingleOutcome>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome?),
            Err(e) => tracing::warn!(error = %e, "training task did not complete"),
        }
    }

    let mut descriptors = Vec::with_capacity(total);
    for (index, (label, outcome)) in labels.into_iter().zip(outcomes).enumerate() {
        match outcome {
            Some(SingleOutcome::Face(embedding)) => {
                descriptors.push(single(label, embedding));
            }
            Some(SingleOutcome::NoFace) => {
                tracing::warn!(index, label = %label, "no face in captured sample, skipping");
            }
            Some(SingleOutcome::Failed(error)) => {
                tracing::warn!(index, label = %label, %error, "inference failed on captured sample, skipping");
            }
            None => {
                tracing::warn!(index, label = %label, "captured sample was not processed, skipping");
            }
        }
    }

    tracing::info!(
        submitted = total,
        enrolled = descriptors.len(),
        "training batch processed"
    );
    Ok(descriptors)
}

fn single(label: String, embedding: Embedding) -> LabeledDescriptor {
    LabeledDescriptor::new(label, vec![embedding])
}
