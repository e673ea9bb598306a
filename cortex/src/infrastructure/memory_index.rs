// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory vector index using exhaustive cosine search.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::PatternId;
use crate::infrastructure::repository::{IndexCandidate, IndexFilter, VectorIndex};

#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<PatternId, (Vec<f32>, Value)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Cosine similarity clamped to `[0, 1]`; mismatched or zero vectors score 0.
    fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        ((dot / (norm_a * norm_b)) as f64).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: PatternId, embedding: Vec<f32>, payload: Value) -> Result<()> {
        self.entries.write().await.insert(id, (embedding, payload));
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<IndexCandidate>> {
        let entries = self.entries.read().await;

        let mut results: Vec<IndexCandidate> = entries
            .iter()
            .filter(|(_, (_, payload))| filter.matches(payload))
            .map(|(id, (stored, payload))| IndexCandidate {
                id: *id,
                score: Self::cosine_similarity(embedding, stored),
                payload: payload.clone(),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }
}
