//! Shared descriptor store: one writer path, many snapshot readers.

use crate::catalog::Catalog;
use crate::engine::{detect_one, EngineError, InferenceEngine, SingleOutcome};
use facetag_core::{DescriptorStore, Embedding, EntryOrigin, LabeledDescriptor, StoreSummary};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Publishes immutable [`DescriptorStore`] snapshots.
///
/// Every merge swaps in a whole new store, so `snapshot()` and watchers only
/// ever see fully applied merges.
#[derive(Clone)]
pub struct StoreHandle {
    tx: Arc<watch::Sender<DescriptorStore>>,
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new(DescriptorStore::new())
    }
}

impl StoreHandle {
    pub fn new(store: DescriptorStore) -> Self {
        let (tx, _rx) = watch::channel(store);
        Self { tx: Arc::new(tx) }
    }

    /// Build the store from a catalog. Fails only if the engine is unusable.
    pub async fn bootstrap(
        engine: Arc<dyn InferenceEngine>,
        catalog: &Catalog,
    ) -> Result<Self, EngineError> {
        let descriptors = bootstrap_load(engine, catalog).await?;
        let handle = Self::default();
        handle.merge(EntryOrigin::Bootstrap, descriptors);
        Ok(handle)
    }

    pub fn snapshot(&self) -> DescriptorStore {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DescriptorStore> {
        self.tx.subscribe()
    }

    pub fn summary(&self) -> StoreSummary {
        self.tx.borrow().summary()
    }

    /// Append `descriptors` and publish the new snapshot.
    pub fn merge(&self, origin: EntryOrigin, descriptors: Vec<LabeledDescriptor>) -> StoreSummary {
        let added = descriptors.len();
        let mut summary = StoreSummary::default();
        self.tx.send_modify(|store| {
            *store = store.merge(origin, descriptors);
            summary = store.summary();
        });
        tracing::info!(
            ?origin,
            added,
            entries = summary.entries,
            embeddings = summary.embeddings,
            "descriptor store updated"
        );
        summary
    }
}

/// Detect one face per catalog image, all images in parallel.
///
/// Returns one descriptor per catalog identity in catalog order, even when
/// none of its images produced a face. Unreadable images, faceless images and
/// per-call inference errors are logged and skipped.
pub async fn bootstrap_load(
    engine: Arc<dyn InferenceEngine>,
    catalog: &Catalog,
) -> Result<Vec<LabeledDescriptor>, EngineError> {
    tracing::info!(
        identities = catalog.identities.len(),
        images = catalog.image_count(),
        "bootstrap started"
    );

    // Every image of every label runs at once; slots keep catalog order.
    let mut slots: Vec<Vec<Option<Embedding>>> = catalog
        .identities
        .iter()
        .map(|identity| vec![None; identity.images.len()])
        .collect();
    let mut tasks = JoinSet::new();
    for (label_index, identity) in catalog.identities.iter().enumerate() {
        for (image_index, path) in identity.images.iter().enumerate() {
            let engine = engine.clone();
            let label = identity.label.clone();
            let path = path.clone();
            tasks.spawn(async move {
                let embedded = embed_catalog_image(engine, label, path).await;
                (label_index, image_index, embedded)
            });
        }
    }

    // Returning early drops the set, which aborts the images still in flight.
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((label_index, image_index, embedded)) => {
                slots[label_index][image_index] = embedded?;
            }
            Err(e) => tracing::warn!(error = %e, "bootstrap task did not complete"),
        }
    }

    let mut descriptors = Vec::with_capacity(slots.len());
    for (identity, slot) in catalog.identities.iter().zip(slots) {
        let label = identity.label.clone();
        let embeddings: Vec<Embedding> = slot.into_iter().flatten().collect();
        if embeddings.is_empty() {
            tracing::warn!(label = %label, "no usable catalog image for label");
        }
        tracing::debug!(label = %label, embeddings = embeddings.len(), "label bootstrapped");
        descriptors.push(LabeledDescriptor::new(label, embeddings));
    }
    Ok(descriptors)
}

async fn embed_catalog_image(
    engine: Arc<dyn InferenceEngine>,
    label: String,
    path: PathBuf,
) -> Result<Option<Embedding>, EngineError> {
    let load_path = path.clone();
    let loaded =
        tokio::task::spawn_blocking(move || image::open(&load_path).map(|img| img.to_rgb8())).await;
    let image = match loaded {
        Ok(Ok(image)) => Arc::new(image),
        Ok(Err(e)) => {
            tracing::warn!(label = %label, path = %path.display(), error = %e, "unreadable catalog image, skipping");
            return Ok(None);
        }
        Err(e) => {
            tracing::warn!(label = %label, path = %path.display(), error = %e, "image loader panicked");
            return Ok(None);
        }
    };

    match detect_one(engine, image).await? {
        SingleOutcome::Face(embedding) => Ok(Some(embedding)),
        SingleOutcome::NoFace => {
            tracing::warn!(label = %label, path = %path.display(), "no face detected in catalog image");
            Ok(None)
        }
        SingleOutcome::Failed(error) => {
            tracing::warn!(label = %label, path = %path.display(), %error, "inference failed on catalog image");
            Ok(None)
        }
    }
}
