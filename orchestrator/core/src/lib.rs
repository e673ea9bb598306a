// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Crucible Core
//!
//! Turns a list of atomic tasks into validated implementations: plans a
//! dependency DAG, runs it level by level, reuses or generates code for each
//! task, validates it with a judge ensemble and feeds successes back into the
//! pattern bank.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Planning, inference, validation and orchestration

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod telemetry;

pub use application::{
    build_orchestrator, EnsembleValidator, InferenceEngine, Orchestrator, OrchestratorError,
};
pub use domain::config::CoreConfig;
pub use domain::dag::{Dag, DagBuilder, DagError};
pub use domain::execution::{RunId, RunReport, RunSummary, TaskRecord, TaskState, TaskStatus};
pub use domain::generation::{
    CodeGenerator, GeneratedCode, GenerationError, GenerationRequest, InferenceContext,
};
pub use domain::task::{AtomicTask, TaskId};
pub use domain::validation::{Judge, JudgeError, JudgeVerdict, ValidationResult};
