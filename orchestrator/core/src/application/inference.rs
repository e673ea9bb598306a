// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Inference Engine
//!
//! Chooses between adapting a stored pattern and generating from scratch:
//!
//! | Best match score | Action |
//! |------------------|--------|
//! | `>= reuse_threshold` | Adapt: generator receives the stored implementation as exemplar |
//! | `>= match_threshold` | Scratch (match logged, not used) |
//! | no match / bank error | Scratch |
//!
//! A pattern bank failure never fails inference; it only loses the chance of
//! reuse. Generator failures surface as [`InferenceError`] so the
//! orchestrator can decide whether to retry.

use std::sync::Arc;

use crucible_cortex::{Implementation, PatternBank, PatternId, SemanticTaskSignature};
use tracing::{debug, info, warn};

use crate::domain::config::InferenceConfig;
use crate::domain::generation::{
    CodeGenerator, GenerationError, GenerationMode, GenerationRequest, InferenceContext,
};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl InferenceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, InferenceError::Generation(GenerationError::Timeout(_)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceSource {
    Adapted { pattern_id: PatternId, score: f64 },
    Generated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub implementation: Implementation,
    pub source: InferenceSource,
}

impl Inference {
    pub fn source_pattern(&self) -> Option<PatternId> {
        match self.source {
            InferenceSource::Adapted { pattern_id, .. } => Some(pattern_id),
            InferenceSource::Generated => None,
        }
    }
}

pub struct InferenceEngine {
    pattern_bank: Arc<dyn PatternBank>,
    generator: Arc<dyn CodeGenerator>,
    config: InferenceConfig,
}

impl InferenceEngine {
    pub fn new(
        pattern_bank: Arc<dyn PatternBank>,
        generator: Arc<dyn CodeGenerator>,
        config: InferenceConfig,
    ) -> Self {
        Self {
            pattern_bank,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub async fn infer(
        &self,
        signature: &SemanticTaskSignature,
        context: &InferenceContext,
    ) -> Result<Inference, InferenceError> {
        let mode = self.select_mode(signature, context).await;
        let source = match &mode {
            GenerationMode::Adapt { pattern_id, score, .. } => InferenceSource::Adapted {
                pattern_id: *pattern_id,
                score: *score,
            },
            GenerationMode::Scratch => InferenceSource::Generated,
        };
        metrics::counter!(
            "crucible_inference_total",
            "mode" => if matches!(source, InferenceSource::Generated) { "scratch" } else { "adapt" }
        )
        .increment(1);

        let request = GenerationRequest {
            mode,
            signature: signature.clone(),
            context: context.clone(),
        };

        let generated = self.generator.generate(&request).await?;
        if generated.code.trim().is_empty() {
            return Err(GenerationError::MalformedOutput(
                "generator returned empty code".to_string(),
            )
            .into());
        }

        Ok(Inference {
            implementation: generated.into(),
            source,
        })
    }

    async fn select_mode(
        &self,
        signature: &SemanticTaskSignature,
        context: &InferenceContext,
    ) -> GenerationMode {
        let matches = match self
            .pattern_bank
            .find_similar(signature, self.config.match_threshold, self.config.match_limit)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!(
                    task_id = %context.task_id(),
                    error = %e,
                    "Pattern lookup failed, generating from scratch"
                );
                return GenerationMode::Scratch;
            }
        };

        match matches.into_iter().next() {
            Some(best) if best.score >= self.config.reuse_threshold => {
                info!(
                    task_id = %context.task_id(),
                    pattern_id = %best.pattern.id,
                    score = best.score,
                    attempt = context.attempt(),
                    "Adapting stored pattern"
                );
                GenerationMode::Adapt {
                    pattern_id: best.pattern.id,
                    exemplar: best.pattern.implementation,
                    score: best.score,
                }
            }
            Some(best) => {
                debug!(
                    task_id = %context.task_id(),
                    score = best.score,
                    reuse_threshold = self.config.reuse_threshold,
                    "Best match below reuse threshold, generating from scratch"
                );
                GenerationMode::Scratch
            }
            None => {
                debug!(task_id = %context.task_id(), "No similar pattern, generating from scratch");
                GenerationMode::Scratch
            }
        }
    }
}
