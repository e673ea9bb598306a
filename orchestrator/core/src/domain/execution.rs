// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Per-task state machine and the run report returned to callers.
//!
//! ```text
//! PENDING -> INFERRING -> VALIDATING -> SUCCEEDED
//!                ^             |
//!                |             v
//!                +-------- RETRYING ----> FAILED
//! ```
//!
//! Any non-terminal state may move to CANCELLED. A PENDING task moves straight
//! to FAILED when an upstream dependency did not succeed.

use chrono::{DateTime, Utc};
use crucible_cortex::{Implementation, PatternId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use super::task::TaskId;
use super::validation::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Inferring,
    Validating,
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        if next == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, Inferring)
                | (Pending, Failed)
                | (Inferring, Validating)
                | (Inferring, Retrying)
                | (Inferring, Failed)
                | (Validating, Succeeded)
                | (Validating, Retrying)
                | (Validating, Failed)
                | (Retrying, Inferring)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Inferring => "INFERRING",
            TaskState::Validating => "VALIDATING",
            TaskState::Retrying => "RETRYING",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl From<TaskStatus> for TaskState {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Succeeded => TaskState::Succeeded,
            TaskStatus::Failed => TaskState::Failed,
            TaskStatus::Cancelled => TaskState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: TaskState,
    pub to: TaskState,
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub implementation: Option<Implementation>,
    /// Result of the last validation attempt, if any ran.
    pub validation: Option<ValidationResult>,
    pub attempts: u32,
    pub failure: Option<String>,
    /// Pattern adapted by the last attempt.
    pub source_pattern: Option<PatternId>,
    /// Pattern written back after success.
    pub stored_pattern: Option<PatternId>,
    pub transitions: Vec<StateTransition>,
}

impl TaskRecord {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    /// States visited in order, starting with PENDING.
    pub fn state_path(&self) -> Vec<TaskState> {
        let mut path = Vec::with_capacity(self.transitions.len() + 1);
        path.push(
            self.transitions
                .first()
                .map(|t| t.from)
                .unwrap_or(TaskState::Pending),
        );
        path.extend(self.transitions.iter().map(|t| t.to));
        path
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
    pub patterns_stored: usize,
    pub pattern_write_failures: usize,
    pub total_attempts: u64,
}

impl RunSummary {
    pub fn record(&mut self, record: &TaskRecord) {
        match record.status {
            TaskStatus::Succeeded => self.succeeded_count += 1,
            TaskStatus::Failed => self.failed_count += 1,
            TaskStatus::Cancelled => self.cancelled_count += 1,
        }
        self.total_attempts += u64::from(record.attempts);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub levels: Vec<BTreeSet<TaskId>>,
    pub records: BTreeMap<TaskId, TaskRecord>,
    pub summary: RunSummary,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn record(&self, id: &str) -> Option<&TaskRecord> {
        self.records.get(&TaskId::new(id))
    }

    pub fn all_succeeded(&self) -> bool {
        self.records.values().all(TaskRecord::succeeded)
    }
}
