//! Append-only descriptor store.
//!
//! A [`DescriptorStore`] is an immutable value: [`DescriptorStore::merge`]
//! returns a new store sharing nothing mutable with the old one, so a reader
//! holding a snapshot never observes a half-applied merge.

use crate::types::LabeledDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Where a store entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryOrigin {
    Bootstrap,
    Training,
}

/// A labeled descriptor plus the metadata recorded when it was inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub id: Uuid,
    pub origin: EntryOrigin,
    pub added_at: DateTime<Utc>,
    pub descriptor: LabeledDescriptor,
}

/// Counts shown as store status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub entries: usize,
    pub embeddings: usize,
    pub empty_entries: usize,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    entries: Arc<Vec<StoreEntry>>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every descriptor as a separate entry, returning the new store.
    ///
    /// Re-adding a label creates another entry; nothing is merged by key and
    /// existing entries are carried over unchanged.
    pub fn merge<I>(&self, origin: EntryOrigin, descriptors: I) -> DescriptorStore
    where
        I: IntoIterator<Item = LabeledDescriptor>,
    {
        let added_at = Utc::now();
        let mut entries = Vec::clone(&self.entries);
        entries.extend(descriptors.into_iter().map(|descriptor| StoreEntry {
            id: Uuid::new_v4(),
            origin,
            added_at,
            descriptor,
        }));
        DescriptorStore {
            entries: Arc::new(entries),
        }
    }

    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &LabeledDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct labels in first-insertion order.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for d in self.descriptors() {
            if !labels.iter().any(|l| l == &d.label) {
                labels.push(d.label.clone());
            }
        }
        labels
    }

    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            entries: self.len(),
            embeddings: self.descriptors().map(|d| d.embeddings.len()).sum(),
            empty_entries: self
                .descriptors()
                .filter(|d| d.embeddings.is_empty())
                .count(),
            labels: self.labels(),
        }
    }
}
