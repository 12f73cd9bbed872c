use crate::common::{GateError, Result};
use crate::storage::EmbeddingStore;
use std::sync::Arc;

pub type Embedding = Vec<f32>;

/// Closest enrolled identity to a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub user_id: String,
    pub name: String,
    pub distance: f32,
}

/// Nearest-neighbour lookup over the enrolled embeddings.
pub trait NearestNeighborIndex: Send + Sync {
    /// `None` when nothing is enrolled.
    fn nearest(&self, probe: &[f32]) -> Result<Option<Neighbor>>;
}

/// Scans every enrolled user on each query. O(n·d).
pub struct LinearScanIndex {
    store: Arc<dyn EmbeddingStore>,
}

impl LinearScanIndex {
    pub fn new(store: Arc<dyn EmbeddingStore>) -> Self {
        Self { store }
    }
}

impl NearestNeighborIndex for LinearScanIndex {
    fn nearest(&self, probe: &[f32]) -> Result<Option<Neighbor>> {
        let mut best: Option<Neighbor> = None;

        for user in self.store.all_entries()? {
            let user = user?;
            if user.embedding.len() != probe.len() {
                tracing::warn!(
                    "Skipping user {}: stored embedding has {} dims, probe has {}",
                    user.id,
                    user.embedding.len(),
                    probe.len()
                );
                continue;
            }
            let distance = euclidean_distance(probe, &user.embedding);
            // strict: the first entry seen wins a tie
            if best.as_ref().map_or(true, |b| distance < b.distance) {
                best = Some(Neighbor {
                    user_id: user.id,
                    name: user.name,
                    distance,
                });
            }
        }

        Ok(best)
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

pub fn validate_embedding(embedding: &[f32], dimensions: usize) -> Result<()> {
    if embedding.is_empty() {
        return Err(GateError::InvalidEmbedding("embedding is empty".into()));
    }
    if embedding.len() != dimensions {
        return Err(GateError::InvalidEmbedding(format!(
            "expected {} dimensions, got {}",
            dimensions,
            embedding.len()
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(GateError::InvalidEmbedding("embedding has non-finite components".into()));
    }
    Ok(())
}
