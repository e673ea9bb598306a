// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events emitted while a plan runs.

use chrono::{DateTime, Utc};
use crucible_cortex::PatternId;
use serde::{Deserialize, Serialize};

use super::execution::{RunId, RunSummary, TaskState};
use super::task::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        task_count: usize,
        level_count: usize,
        started_at: DateTime<Utc>,
    },
    LevelStarted {
        run_id: RunId,
        level: usize,
        tasks: Vec<TaskId>,
    },
    LevelCompleted {
        run_id: RunId,
        level: usize,
        succeeded: usize,
        failed: usize,
        duration_ms: u64,
    },
    RunCompleted {
        run_id: RunId,
        summary: RunSummary,
        completed_at: DateTime<Utc>,
    },
    RunCancelled {
        run_id: RunId,
        /// Level that was executing (or about to start) when cancellation arrived.
        level: usize,
        cancelled_at: DateTime<Utc>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::LevelStarted { run_id, .. }
            | RunEvent::LevelCompleted { run_id, .. }
            | RunEvent::RunCompleted { run_id, .. }
            | RunEvent::RunCancelled { run_id, .. } => *run_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskEvent {
    StateChanged {
        run_id: RunId,
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
        attempt: u32,
    },
    AttemptFailed {
        run_id: RunId,
        task_id: TaskId,
        attempt: u32,
        reason: String,
    },
}

impl TaskEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            TaskEvent::StateChanged { run_id, .. } | TaskEvent::AttemptFailed { run_id, .. } => {
                *run_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LearningEvent {
    PatternStored {
        run_id: RunId,
        task_id: TaskId,
        pattern_id: PatternId,
        quality_score: f64,
    },
    PatternReused {
        run_id: RunId,
        task_id: TaskId,
        pattern_id: PatternId,
        score: f64,
    },
    PatternWriteFailed {
        run_id: RunId,
        task_id: TaskId,
        error: String,
    },
}

impl LearningEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            LearningEvent::PatternStored { run_id, .. }
            | LearningEvent::PatternReused { run_id, .. }
            | LearningEvent::PatternWriteFailed { run_id, .. } => *run_id,
        }
    }
}
