// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Code Generation Domain
//!
//! Capability interface for the external generation service and the
//! immutable per-attempt context handed to it.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** `CodeGenerator` contract, request and context values

use async_trait::async_trait;
use crucible_cortex::{Implementation, PatternId, SemanticTaskSignature};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::task::{AtomicTask, TaskId};

/// What an already-finished upstream task produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyOutput {
    pub purpose: String,
    pub outputs: BTreeMap<String, String>,
    pub code: String,
}

/// Context for one inference attempt. A retry builds a new value with
/// [`InferenceContext::with_retry`]; an existing context is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceContext {
    task_id: TaskId,
    task_name: String,
    complexity: f64,
    estimated_size: u32,
    dependency_outputs: BTreeMap<TaskId, DependencyOutput>,
    previous_error: Option<String>,
    attempt: u32,
}

impl InferenceContext {
    /// First-attempt context for `task`.
    pub fn for_task(
        task: &AtomicTask,
        dependency_outputs: BTreeMap<TaskId, DependencyOutput>,
    ) -> Self {
        Self {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            complexity: task.complexity,
            estimated_size: task.estimated_size,
            dependency_outputs,
            previous_error: None,
            attempt: 1,
        }
    }

    /// Context for the next attempt, carrying the error that ended this one.
    pub fn with_retry(&self, previous_error: impl Into<String>) -> Self {
        Self {
            previous_error: Some(previous_error.into()),
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn complexity(&self) -> f64 {
        self.complexity
    }

    pub fn estimated_size(&self) -> u32 {
        self.estimated_size
    }

    pub fn dependency_outputs(&self) -> &BTreeMap<TaskId, DependencyOutput> {
        &self.dependency_outputs
    }

    pub fn previous_error(&self) -> Option<&str> {
        self.previous_error.as_deref()
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationMode {
    /// Produce a minimally modified variant of a stored implementation.
    Adapt {
        pattern_id: PatternId,
        exemplar: Implementation,
        score: f64,
    },
    /// No exemplar; generate from the signature and context alone.
    Scratch,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub mode: GenerationMode,
    pub signature: SemanticTaskSignature,
    pub context: InferenceContext,
}

impl GenerationRequest {
    pub fn exemplar(&self) -> Option<&Implementation> {
        match &self.mode {
            GenerationMode::Adapt { exemplar, .. } => Some(exemplar),
            GenerationMode::Scratch => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub code: String,
    #[serde(default)]
    pub declared_dependencies: Vec<String>,
    #[serde(default)]
    pub external_library_refs: Vec<String>,
}

impl From<GeneratedCode> for Implementation {
    fn from(generated: GeneratedCode) -> Self {
        Implementation {
            code: generated.code,
            declared_dependencies: generated.declared_dependencies,
            external_library_refs: generated.external_library_refs,
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("malformed generator output: {0}")]
    MalformedOutput(String),
    #[error("generation provider failed: {0}")]
    Provider(String),
}

/// External generation service.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedCode, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_builds_new_context() {
        let task = AtomicTask::new("a", "do a").with_complexity(0.8);
        let first = InferenceContext::for_task(&task, BTreeMap::new());
        let second = first.with_retry("judges rejected");
        let third = second.with_retry("still wrong");

        assert_eq!(first.attempt(), 1);
        assert!(first.previous_error().is_none());
        assert!(!first.is_retry());

        assert_eq!(second.attempt(), 2);
        assert_eq!(second.previous_error(), Some("judges rejected"));
        assert_eq!(third.attempt(), 3);
        assert_eq!(third.previous_error(), Some("still wrong"));
        assert_eq!(third.complexity(), 0.8);
    }
}
