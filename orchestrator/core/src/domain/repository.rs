// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Plan Repository
//!
//! Optional persistence of executed task graphs for audit and later learning.
//! The orchestrator only needs key-value semantics: save a plan under its run
//! id and read it back.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `PlanRepository` | `Dag` | `InMemoryPlanRepository` |

use async_trait::async_trait;

use crate::domain::dag::Dag;
use crate::domain::execution::RunId;

#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Save the plan for a run (create or replace).
    async fn save(&self, run_id: RunId, dag: &Dag) -> Result<(), RepositoryError>;

    async fn find(&self, run_id: RunId) -> Result<Option<Dag>, RepositoryError>;

    async fn list_runs(&self) -> Result<Vec<RunId>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
