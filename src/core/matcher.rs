use crate::common::Result;
use crate::core::index::{validate_embedding, NearestNeighborIndex};
use std::sync::Arc;

/// Outcome of matching one probe. Lower `distance` is better; it is not a probability.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub matched: bool,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub distance: f32,
    pub camera_id: String,
}

pub struct Matcher {
    index: Arc<dyn NearestNeighborIndex>,
    threshold: f32,
    dimensions: usize,
}

impl Matcher {
    pub fn new(index: Arc<dyn NearestNeighborIndex>, threshold: f32, dimensions: usize) -> Self {
        Self { index, threshold, dimensions }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Accepts the nearest enrolled identity when its distance is within the
    /// threshold (inclusive). An empty store is a plain no-match.
    pub fn match_probe(&self, probe: &[f32], camera_id: &str) -> Result<ProbeResult> {
        validate_embedding(probe, self.dimensions)?;

        let result = match self.index.nearest(probe)? {
            Some(best) if best.distance <= self.threshold => ProbeResult {
                matched: true,
                user_id: Some(best.user_id),
                name: Some(best.name),
                distance: best.distance,
                camera_id: camera_id.to_string(),
            },
            Some(best) => ProbeResult {
                matched: false,
                user_id: None,
                name: None,
                distance: best.distance,
                camera_id: camera_id.to_string(),
            },
            None => ProbeResult {
                matched: false,
                user_id: None,
                name: None,
                distance: f32::INFINITY,
                camera_id: camera_id.to_string(),
            },
        };

        tracing::debug!(
            "Probe from {}: best distance {:.4} (threshold {:.4}) -> {}",
            camera_id,
            result.distance,
            self.threshold,
            if result.matched { "match" } else { "no match" }
        );
        Ok(result)
    }
}
