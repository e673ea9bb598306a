// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Storage interfaces for the pattern bank.
//! The similarity index and the embedder are both replaceable backends.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::domain::PatternId;

/// Vector similarity index holding one embedding per pattern.
///
/// Implementations may over-return candidates; the pattern bank re-ranks and
/// applies the final threshold.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the embedding for `id`.
    async fn upsert(&self, id: PatternId, embedding: Vec<f32>, payload: Value) -> Result<()>;

    /// Up to `top_k` nearest candidates, best first.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<IndexCandidate>>;
}

/// Produces dense embeddings for free text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;
}

/// Payload-level restriction applied before ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexFilter {
    pub domain: Option<String>,
}

impl IndexFilter {
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
        }
    }

    pub fn matches(&self, payload: &Value) -> bool {
        match &self.domain {
            Some(domain) => payload.get("domain").and_then(Value::as_str) == Some(domain.as_str()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexCandidate {
    pub id: PatternId,
    /// Cosine similarity in `[0, 1]`.
    pub score: f64,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_domain() {
        let filter = IndexFilter::for_domain("serialization");
        assert!(filter.matches(&json!({ "domain": "serialization" })));
        assert!(!filter.matches(&json!({ "domain": "media" })));
        assert!(!filter.matches(&json!({})));
        assert!(IndexFilter::default().matches(&json!({})));
    }
}
