// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Ensemble Validation Domain
//!
//! Candidate implementations are scored by several independent judges and the
//! verdicts are folded into one [`ValidationResult`].
//!
//! | Type | Description |
//! |------|-------------|
//! | `Judge` | Capability interface for a single reviewer |
//! | `JudgeVerdict` | `{approved, score, issues}` from one judge |
//! | `ValidationResult` | Vote count, mean score, merged issues |
//! | `Disagreement` | Score spread wider than the configured delta |
//!
//! A wide score spread is not an error. It is carried on the result and makes
//! [`ValidationResult::accepted`] return false, which feeds the normal retry
//! path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub approved: bool,
    /// Clamped to `[0, 1]` by the validator.
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl JudgeVerdict {
    pub fn approve(score: f64) -> Self {
        Self {
            approved: true,
            score,
            issues: Vec::new(),
        }
    }

    pub fn reject(score: f64, issues: Vec<String>) -> Self {
        Self {
            approved: false,
            score,
            issues,
        }
    }
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("judge provider failed: {0}")]
    Provider(String),
    #[error("malformed verdict: {0}")]
    MalformedVerdict(String),
    #[error("judge timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// One independent reviewer. Implementations are individually unreliable;
/// the validator tolerates any of them failing.
#[async_trait]
pub trait Judge: Send + Sync {
    fn name(&self) -> &str;

    async fn judge(&self, code: &str, task_description: &str) -> Result<JudgeVerdict, JudgeError>;
}

/// One judge's contribution to an aggregate result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeOutcome {
    pub judge: String,
    pub approved: bool,
    pub score: f64,
    /// Set when the judge failed and its vote was counted as a rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Judges' scores spread further apart than the configured delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    pub min_score: f64,
    pub max_score: f64,
    pub delta: f64,
}

impl Disagreement {
    pub fn spread(&self) -> f64 {
        self.max_score - self.min_score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// `approvals / total_judges >= voting_threshold`.
    pub approved: bool,
    /// Mean of judge scores.
    pub score: f64,
    pub approvals: usize,
    pub total_judges: usize,
    /// Union of all judges' issues, first occurrence order.
    pub issues: Vec<String>,
    #[serde(default)]
    pub verdicts: Vec<JudgeOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disagreement: Option<Disagreement>,
}

impl ValidationResult {
    /// Whether the orchestrator may treat this attempt as a success.
    pub fn accepted(&self) -> bool {
        self.approved && self.disagreement.is_none()
    }

    /// Compact description used as retry feedback.
    pub fn feedback(&self) -> String {
        let mut text = format!(
            "validation rejected: {}/{} approvals, score {:.2}",
            self.approvals, self.total_judges, self.score
        );
        if let Some(d) = &self.disagreement {
            text.push_str(&format!(
                "; judges disagree (scores {:.2}..{:.2} exceed delta {:.2})",
                d.min_score, d.max_score, d.delta
            ));
        }
        if !self.issues.is_empty() {
            text.push_str("; issues: ");
            text.push_str(&self.issues.join("; "));
        }
        text
    }
}
