// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task DAG
//!
//! Converts the planner's flat task list into a validated acyclic graph and a
//! leveled execution plan.
//!
//! ## Construction order
//!
//! 1. Task-level checks: unique ids, non-empty purpose, complexity in `[0, 1]`.
//! 2. Referential integrity: every dependency names a task in the list.
//! 3. Cycle detection by iterative DFS coloring; the error carries the cycle
//!    path (a self-dependency is a cycle of length one).
//! 4. Kahn-style leveling over adjacency and reverse adjacency. Level 0 holds
//!    every task without dependencies; level *k* holds tasks whose whole
//!    dependency set lies in levels `0..k`.
//!
//! Intra-level order carries no meaning. Callers must not rely on it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

use super::task::{AtomicTask, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("dependency cycle detected: {}", render_path(.path))]
    Cycle { path: Vec<TaskId> },

    #[error("duplicate task id '{0}'")]
    DuplicateTask(TaskId),

    #[error("invalid task '{task}': {reason}")]
    InvalidTask { task: TaskId, reason: String },
}

fn render_path(path: &[TaskId]) -> String {
    path.iter().map(TaskId::as_str).collect::<Vec<_>>().join(" -> ")
}

/// Immutable, validated task graph with its level assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    nodes: BTreeMap<TaskId, AtomicTask>,
    levels: Vec<BTreeSet<TaskId>>,
    dependents: BTreeMap<TaskId, BTreeSet<TaskId>>,
    warnings: Vec<String>,
}

impl Dag {
    pub fn nodes(&self) -> &BTreeMap<TaskId, AtomicTask> {
        &self.nodes
    }

    pub fn levels(&self) -> &[BTreeSet<TaskId>] {
        &self.levels
    }

    pub fn task(&self, id: &TaskId) -> Option<&AtomicTask> {
        self.nodes.get(id)
    }

    pub fn level_of(&self, id: &TaskId) -> Option<usize> {
        self.levels.iter().position(|level| level.contains(id))
    }

    /// Tasks that list `id` among their dependencies.
    pub fn dependents_of(&self, id: &TaskId) -> impl Iterator<Item = &TaskId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Non-fatal anomalies found while leveling.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

pub struct DagBuilder;

impl DagBuilder {
    pub fn build(tasks: Vec<AtomicTask>) -> Result<Dag, DagError> {
        let mut nodes = BTreeMap::new();
        for task in tasks {
            Self::check_task(&task)?;
            if nodes.contains_key(&task.id) {
                return Err(DagError::DuplicateTask(task.id));
            }
            nodes.insert(task.id.clone(), task);
        }

        for task in nodes.values() {
            if let Some(missing) = task.dependencies.iter().find(|d| !nodes.contains_key(*d)) {
                return Err(DagError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        if let Some(path) = find_cycle(&nodes) {
            warn!(cycle = %render_path(&path), "Rejecting task graph with a dependency cycle");
            return Err(DagError::Cycle { path });
        }

        let mut dependents: BTreeMap<TaskId, BTreeSet<TaskId>> = BTreeMap::new();
        for task in nodes.values() {
            for dep in &task.dependencies {
                dependents.entry(dep.clone()).or_default().insert(task.id.clone());
            }
        }

        let (levels, warnings) = assign_levels(&nodes, &dependents);

        debug!(tasks = nodes.len(), levels = levels.len(), "Built task DAG");

        Ok(Dag {
            nodes,
            levels,
            dependents,
            warnings,
        })
    }

    fn check_task(task: &AtomicTask) -> Result<(), DagError> {
        if task.id.as_str().trim().is_empty() {
            return Err(DagError::InvalidTask {
                task: task.id.clone(),
                reason: "task id is empty".to_string(),
            });
        }
        if task.purpose.trim().is_empty() {
            return Err(DagError::InvalidTask {
                task: task.id.clone(),
                reason: "purpose is empty".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&task.complexity) {
            return Err(DagError::InvalidTask {
                task: task.id.clone(),
                reason: format!("complexity {} is outside [0, 1]", task.complexity),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// First cycle found, as a path that starts and ends on the same task.
fn find_cycle(nodes: &BTreeMap<TaskId, AtomicTask>) -> Option<Vec<TaskId>> {
    let edges: HashMap<&TaskId, Vec<&TaskId>> = nodes
        .values()
        .map(|task| (&task.id, task.dependencies.iter().collect()))
        .collect();
    let mut color: HashMap<&TaskId, Color> = nodes.keys().map(|id| (id, Color::White)).collect();

    for start in nodes.keys() {
        if color.get(start) != Some(&Color::White) {
            continue;
        }

        let mut stack: Vec<(&TaskId, usize)> = vec![(start, 0)];
        color.insert(start, Color::Grey);

        while let Some(&(node, next_edge)) = stack.last() {
            let out = edges.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if next_edge >= out.len() {
                color.insert(node, Color::Black);
                stack.pop();
                continue;
            }

            if let Some(frame) = stack.last_mut() {
                frame.1 += 1;
            }
            let dep = out[next_edge];

            match color.get(dep).copied().unwrap_or(Color::Black) {
                Color::White => {
                    color.insert(dep, Color::Grey);
                    stack.push((dep, 0));
                }
                Color::Grey => {
                    let from = stack.iter().position(|(id, _)| *id == dep).unwrap_or(0);
                    let mut path: Vec<TaskId> =
                        stack[from..].iter().map(|(id, _)| (*id).clone()).collect();
                    path.push(dep.clone());
                    return Some(path);
                }
                Color::Black => {}
            }
        }
    }

    None
}

fn assign_levels(
    nodes: &BTreeMap<TaskId, AtomicTask>,
    dependents: &BTreeMap<TaskId, BTreeSet<TaskId>>,
) -> (Vec<BTreeSet<TaskId>>, Vec<String>) {
    let mut pending: HashMap<&TaskId, usize> = nodes
        .values()
        .map(|task| (&task.id, task.dependencies.len()))
        .collect();

    let mut levels = Vec::new();
    let mut current: BTreeSet<TaskId> = nodes
        .values()
        .filter(|task| task.dependencies.is_empty())
        .map(|task| task.id.clone())
        .collect();
    let mut placed = 0usize;

    while !current.is_empty() {
        let mut next = BTreeSet::new();
        for id in &current {
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        next.insert(dependent.clone());
                    }
                }
            }
        }
        placed += current.len();
        levels.push(current);
        current = next;
    }

    let mut warnings = Vec::new();
    if placed < nodes.len() {
        let leveled: BTreeSet<&TaskId> = levels.iter().flatten().collect();
        let orphans: BTreeSet<TaskId> = nodes
            .keys()
            .filter(|id| !leveled.contains(id))
            .cloned()
            .collect();
        let message = format!(
            "{} task(s) could not be leveled and were appended as a final level: {}",
            orphans.len(),
            orphans.iter().map(TaskId::as_str).collect::<Vec<_>>().join(", ")
        );
        warn!(orphans = orphans.len(), "{}", message);
        warnings.push(message);
        levels.push(orphans);
    }

    (levels, warnings)
}
