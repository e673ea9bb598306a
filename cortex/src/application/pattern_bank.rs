// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pattern Bank
//!
//! Retrieval and storage of validated implementations keyed by
//! [`SemanticTaskSignature`].
//!
//! ## Retrieval
//!
//! The query signature's purpose is embedded and the vector index is asked for
//! `limit * over_fetch_factor` candidates. Stored patterns are indexed under
//! the embedding of their purpose as well, so a query and the pattern stored
//! for the same signature share one vector. Each candidate is re-ranked with
//!
//! ```text
//! score = vector_weight * cosine + structural_weight * signature.similarity
//! ```
//!
//! and only candidates at or above the caller's threshold are returned.
//!
//! ## Storage
//!
//! Only implementations whose validation score reaches `storage_threshold`
//! are kept. Pattern ids are derived from the signature hash and the code, so
//! storing the same result twice leaves a single entry.
//!
//! ## Concurrency
//!
//! Pattern records live in a sharded map. Usage updates take the shard lock
//! for the single record they touch, so concurrent `record_usage` calls on the
//! same pattern never lose an increment.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Implementation, PatternId, PatternMatch, SemanticTaskSignature, StoredPattern};
use crate::infrastructure::{EmbeddingProvider, IndexFilter, VectorIndex};

#[derive(Debug, Error)]
pub enum PatternBankError {
    #[error("pattern write failed: {0}")]
    Write(String),
    #[error("pattern query failed: {0}")]
    Query(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternBankConfig {
    /// Minimum validation score for an implementation to be stored.
    pub storage_threshold: f64,
    pub vector_weight: f64,
    pub structural_weight: f64,
    /// Index candidates requested per returned match.
    pub over_fetch_factor: usize,
    /// Characters of code kept as a preview in the index payload.
    pub preview_chars: usize,
}

impl Default for PatternBankConfig {
    fn default() -> Self {
        Self {
            storage_threshold: 0.95,
            vector_weight: 0.7,
            structural_weight: 0.3,
            over_fetch_factor: 2,
            preview_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternBankStats {
    pub total_patterns: usize,
    /// Mean success rate over patterns used at least once; 0.0 when none have been.
    pub average_success_rate: f64,
    pub total_uses: u64,
    pub distinct_domains: usize,
}

#[async_trait]
pub trait PatternBank: Send + Sync {
    /// Patterns scoring at least `threshold`, best first, at most `limit`.
    async fn find_similar(
        &self,
        signature: &SemanticTaskSignature,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<PatternMatch>, PatternBankError>;

    /// Persist a validated implementation. Returns `None` when the score is
    /// below the storage threshold.
    async fn store(
        &self,
        signature: &SemanticTaskSignature,
        implementation: &Implementation,
        quality_score: f64,
    ) -> Result<Option<PatternId>, PatternBankError>;

    /// Unknown ids are logged and ignored.
    async fn record_usage(&self, pattern_id: PatternId, succeeded: bool);

    async fn get(&self, pattern_id: PatternId) -> Option<StoredPattern>;

    async fn stats(&self) -> PatternBankStats;

    fn storage_threshold(&self) -> f64;
}

pub struct StandardPatternBank {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    patterns: DashMap<PatternId, StoredPattern>,
    config: PatternBankConfig,
}

impl StandardPatternBank {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_config(index, embedder, PatternBankConfig::default())
    }

    pub fn with_config(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: PatternBankConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            patterns: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &PatternBankConfig {
        &self.config
    }

    // Queries and stored patterns must embed the same text or an identical
    // signature scores below the match threshold.
    fn embedding_text(signature: &SemanticTaskSignature) -> &str {
        signature.purpose()
    }

    fn combined_score(&self, vector: f64, structural: f64) -> f64 {
        let total = self.config.vector_weight + self.config.structural_weight;
        if total <= 0.0 {
            return 0.0;
        }
        ((self.config.vector_weight * vector + self.config.structural_weight * structural) / total)
            .clamp(0.0, 1.0)
    }
}

#[async_trait]
impl PatternBank for StandardPatternBank {
    async fn find_similar(
        &self,
        signature: &SemanticTaskSignature,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<PatternMatch>, PatternBankError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self
            .embedder
            .embed(Self::embedding_text(signature))
            .await
            .map_err(|e| PatternBankError::Embedding(e.to_string()))?;

        let top_k = limit.saturating_mul(self.config.over_fetch_factor.max(1));
        let candidates = self
            .index
            .query(&embedding, top_k, &IndexFilter::default())
            .await
            .map_err(|e| PatternBankError::Query(e.to_string()))?;

        let candidate_count = candidates.len();
        let mut matches: Vec<PatternMatch> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let Some(pattern) = self.patterns.get(&candidate.id).map(|p| p.value().clone())
                else {
                    debug!(
                        pattern_id = %candidate.id,
                        "Index candidate has no stored record, skipping"
                    );
                    return None;
                };
                let vector_similarity = candidate.score.clamp(0.0, 1.0);
                let structural_similarity = pattern.signature.similarity(signature);
                let score = self.combined_score(vector_similarity, structural_similarity);
                (score >= threshold).then_some(PatternMatch {
                    pattern,
                    score,
                    vector_similarity,
                    structural_similarity,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);

        debug!(
            signature = %signature,
            candidates = candidate_count,
            matches = matches.len(),
            threshold,
            "Pattern lookup complete"
        );

        Ok(matches)
    }

    async fn store(
        &self,
        signature: &SemanticTaskSignature,
        implementation: &Implementation,
        quality_score: f64,
    ) -> Result<Option<PatternId>, PatternBankError> {
        if quality_score < self.config.storage_threshold {
            debug!(
                signature = %signature,
                quality_score,
                storage_threshold = self.config.storage_threshold,
                "Score below storage threshold, not storing"
            );
            return Ok(None);
        }

        let pattern = StoredPattern::new(signature.clone(), implementation.clone(), quality_score);
        let id = pattern.id;

        if self.patterns.contains_key(&id) {
            debug!(pattern_id = %id, "Pattern already stored");
            return Ok(Some(id));
        }

        let embedding = self
            .embedder
            .embed(Self::embedding_text(signature))
            .await
            .map_err(|e| PatternBankError::Write(format!("embedding: {e}")))?;

        let payload = json!({
            "signature_hash": signature.signature_hash(),
            "domain": signature.domain(),
            "purpose": signature.purpose(),
            "quality_score": quality_score,
            "code_preview": implementation.preview(self.config.preview_chars),
        });

        self.index
            .upsert(id, embedding, payload)
            .await
            .map_err(|e| PatternBankError::Write(e.to_string()))?;

        // A concurrent store of the same content may have won the race; keep the first record.
        self.patterns.entry(id).or_insert(pattern);

        info!(pattern_id = %id, signature = %signature, quality_score, "Stored pattern");
        Ok(Some(id))
    }

    async fn record_usage(&self, pattern_id: PatternId, succeeded: bool) {
        match self.patterns.get_mut(&pattern_id) {
            Some(mut entry) => {
                entry.metadata.record_usage(succeeded);
                debug!(
                    pattern_id = %pattern_id,
                    succeeded,
                    uses = entry.metadata.uses,
                    success_rate = entry.metadata.success_rate,
                    "Recorded pattern usage"
                );
            }
            None => {
                warn!(
                    pattern_id = %pattern_id,
                    succeeded,
                    "Usage reported for unknown pattern, ignoring"
                );
            }
        }
    }

    async fn get(&self, pattern_id: PatternId) -> Option<StoredPattern> {
        self.patterns.get(&pattern_id).map(|p| p.value().clone())
    }

    async fn stats(&self) -> PatternBankStats {
        let mut stats = PatternBankStats::default();
        let mut domains = HashSet::new();
        let mut rate_sum = 0.0;
        let mut used = 0usize;

        for entry in self.patterns.iter() {
            let pattern = entry.value();
            stats.total_patterns += 1;
            stats.total_uses += pattern.metadata.uses;
            domains.insert(pattern.signature.domain().to_string());
            if pattern.metadata.uses > 0 {
                rate_sum += pattern.metadata.success_rate;
                used += 1;
            }
        }

        stats.distinct_domains = domains.len();
        if used > 0 {
            stats.average_success_rate = rate_sum / used as f64;
        }
        stats
    }

    fn storage_threshold(&self) -> f64 {
        self.config.storage_threshold
    }
}
