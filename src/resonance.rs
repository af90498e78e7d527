//! Resonance detector (component C).
//!
//! `CosineResonanceDetector::detect` ranks candidates by descending cosine
//! similarity with an explicit lexicographic tie-break on `agent_id`, so two
//! runs over the same inputs always return the same order regardless of
//! hash-map iteration order upstream.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::vector::{cosine_similarity, norm, Vector};

const ZERO_NORM_EPSILON: f32 = 1e-10;

/// Ranks candidate agent vectors against a demand vector by cosine
/// similarity. Pure and idempotent: same inputs always produce the same
/// ordered output.
#[async_trait]
pub trait ResonanceDetector: Send + Sync {
    /// Returns the top `min(k_star, |agent_vectors|)` agents sorted by score
    /// descending, ties broken by ascending `agent_id`.
    async fn detect(
        &self,
        demand_vector: &Vector,
        agent_vectors: &HashMap<String, Vector>,
        k_star: usize,
    ) -> Vec<(String, f32)>;
}

/// The default, and so far only, resonance detector: cosine similarity
/// ranking.
pub struct CosineResonanceDetector;

#[async_trait]
impl ResonanceDetector for CosineResonanceDetector {
    async fn detect(
        &self,
        demand_vector: &Vector,
        agent_vectors: &HashMap<String, Vector>,
        k_star: usize,
    ) -> Vec<(String, f32)> {
        if k_star == 0 || agent_vectors.is_empty() {
            return Vec::new();
        }
        if norm(demand_vector) < ZERO_NORM_EPSILON {
            return Vec::new();
        }

        let mut results: Vec<(String, f32)> = agent_vectors
            .iter()
            .map(|(agent_id, agent_vec)| {
                let score = if norm(agent_vec) < ZERO_NORM_EPSILON {
                    0.0
                } else {
                    cosine_similarity(demand_vector, agent_vec)
                };
                (agent_id.clone(), score)
            })
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(k_star);
        results
    }
}
