// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Ensemble Validator
//!
//! Sends one candidate implementation to every judge concurrently and folds
//! the verdicts into a [`ValidationResult`]:
//!
//! - `approvals` counts approving judges; `approved` is
//!   `approvals / N >= voting_threshold`.
//! - `score` is the mean of all N scores, failed judges counting as 0.
//! - `issues` is the de-duplicated union of every judge's issues.
//! - A judge that errors, panics or exceeds `judge_timeout` becomes a
//!   rejection with score 0 and an issue naming the failure.
//! - When the spread of scores among judges that answered exceeds
//!   `disagreement_delta`, a [`Disagreement`] is attached.
//!
//! The validator is stateless per call. Retrying is the orchestrator's job.

use std::collections::HashSet;
use std::sync::Arc;

use crucible_cortex::Implementation;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::config::ValidationConfig;
use crate::domain::task::AtomicTask;
use crate::domain::validation::{
    Disagreement, Judge, JudgeError, JudgeOutcome, JudgeVerdict, ValidationResult,
};

#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error("ensemble validator requires at least one judge")]
    NoJudges,
}

pub struct EnsembleValidator {
    judges: Vec<Arc<dyn Judge>>,
    config: ValidationConfig,
}

impl EnsembleValidator {
    pub fn new(
        judges: Vec<Arc<dyn Judge>>,
        config: ValidationConfig,
    ) -> Result<Self, ValidatorError> {
        if judges.is_empty() {
            return Err(ValidatorError::NoJudges);
        }
        Ok(Self { judges, config })
    }

    pub fn judge_count(&self) -> usize {
        self.judges.len()
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub async fn validate(
        &self,
        implementation: &Implementation,
        task: &AtomicTask,
    ) -> ValidationResult {
        let code: Arc<str> = Arc::from(implementation.code.as_str());
        let description: Arc<str> = Arc::from(task.description());
        let timeout = self.config.judge_timeout;

        // Dropping the set aborts judges still in flight.
        let mut join_set = JoinSet::new();
        for (index, judge) in self.judges.iter().enumerate() {
            let judge = judge.clone();
            let code = code.clone();
            let description = description.clone();
            join_set.spawn(async move {
                let verdict = tokio::time::timeout(timeout, judge.judge(&code, &description)).await;
                let result = match verdict {
                    Ok(result) => result,
                    Err(_) => Err(JudgeError::Timeout(timeout)),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<JudgeVerdict, JudgeError>>> =
            self.judges.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(join_error) => {
                    warn!(error = %join_error, task_id = %task.id, "Judge task aborted")
                }
            }
        }

        let mut verdicts = Vec::with_capacity(slots.len());
        for (judge, slot) in self.judges.iter().zip(slots) {
            let name = judge.name().to_string();
            let result = slot
                .unwrap_or_else(|| Err(JudgeError::Provider("judge task aborted".to_string())));
            if let Err(e) = &result {
                warn!(
                    judge = %name,
                    error = %e,
                    task_id = %task.id,
                    "Judge failed, counting as rejection"
                );
                metrics::counter!("crucible_judge_failures_total", "judge" => name.clone())
                    .increment(1);
            }
            verdicts.push((name, result));
        }

        let result = aggregate(verdicts, &self.config);
        debug!(
            task_id = %task.id,
            approved = result.approved,
            approvals = result.approvals,
            total = result.total_judges,
            score = result.score,
            disagreement = result.disagreement.is_some(),
            "Ensemble validation complete"
        );
        metrics::histogram!("crucible_validation_score").record(result.score);
        result
    }
}

/// Fold per-judge results into one decision.
pub fn aggregate(
    verdicts: Vec<(String, Result<JudgeVerdict, JudgeError>)>,
    config: &ValidationConfig,
) -> ValidationResult {
    let total_judges = verdicts.len();
    let mut approvals = 0usize;
    let mut score_sum = 0.0;
    let mut answered_scores = Vec::new();
    let mut issues = Vec::new();
    let mut seen = HashSet::new();
    let mut outcomes = Vec::with_capacity(total_judges);

    let mut push_issue = |issue: String, issues: &mut Vec<String>| {
        if seen.insert(issue.clone()) {
            issues.push(issue);
        }
    };

    for (judge, result) in verdicts {
        match result {
            Ok(verdict) => {
                let score = if verdict.score.is_finite() {
                    verdict.score.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                if verdict.approved {
                    approvals += 1;
                }
                score_sum += score;
                answered_scores.push(score);
                for issue in verdict.issues {
                    let issue = issue.trim().to_string();
                    if !issue.is_empty() {
                        push_issue(issue, &mut issues);
                    }
                }
                outcomes.push(JudgeOutcome {
                    judge,
                    approved: verdict.approved,
                    score,
                    error: None,
                });
            }
            Err(e) => {
                push_issue(format!("judge '{judge}' failed: {e}"), &mut issues);
                outcomes.push(JudgeOutcome {
                    judge,
                    approved: false,
                    score: 0.0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let (approved, score) = if total_judges == 0 {
        (false, 0.0)
    } else {
        (
            approvals as f64 / total_judges as f64 >= config.voting_threshold,
            score_sum / total_judges as f64,
        )
    };

    let disagreement = score_spread(&answered_scores).and_then(|(min_score, max_score)| {
        (max_score - min_score > config.disagreement_delta).then_some(Disagreement {
            min_score,
            max_score,
            delta: config.disagreement_delta,
        })
    });

    ValidationResult {
        approved,
        score,
        approvals,
        total_judges,
        issues,
        verdicts: outcomes,
        disagreement,
    }
}

fn score_spread(scores: &[f64]) -> Option<(f64, f64)> {
    if scores.len() < 2 {
        return None;
    }
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((min, max))
}
