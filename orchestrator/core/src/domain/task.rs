// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Atomic Task
//!
//! The smallest unit of code-generation work. Tasks arrive from the upstream
//! planner and are consumed read-only by the DAG builder and the orchestrator.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Task model and signature construction

use crucible_cortex::{PerformanceTier, SecurityLevel, SemanticTaskSignature};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicTask {
    pub id: TaskId,
    pub name: String,
    pub purpose: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    /// Soft budget, e.g. maximum lines.
    #[serde(default)]
    pub estimated_size: u32,
    /// In `[0, 1]`.
    #[serde(default = "default_complexity")]
    pub complexity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub constraints: BTreeSet<String>,
    #[serde(default)]
    pub security_level: SecurityLevel,
    #[serde(default)]
    pub performance_tier: PerformanceTier,
    #[serde(default)]
    pub idempotent: bool,
}

fn default_complexity() -> f64 {
    0.5
}

impl AtomicTask {
    pub fn new(id: impl Into<TaskId>, purpose: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            purpose: purpose.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            estimated_size: 0,
            complexity: default_complexity(),
            domain: None,
            constraints: BTreeSet::new(),
            security_level: SecurityLevel::default(),
            performance_tier: PerformanceTier::default(),
            idempotent: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), type_name.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), type_name.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.insert(constraint.into());
        self
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    pub fn with_performance_tier(mut self, tier: PerformanceTier) -> Self {
        self.performance_tier = tier;
        self
    }

    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_estimated_size(mut self, size: u32) -> Self {
        self.estimated_size = size;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Build the semantic signature for this task. Pure and deterministic.
    pub fn signature(&self) -> SemanticTaskSignature {
        let mut builder = SemanticTaskSignature::builder(&self.purpose)
            .inputs(self.inputs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .outputs(self.outputs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .constraints(self.constraints.iter().map(String::as_str))
            .security_level(self.security_level)
            .performance_tier(self.performance_tier)
            .idempotent(self.idempotent);
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.as_str());
        }
        builder.build()
    }

    /// One-paragraph description handed to judges.
    pub fn description(&self) -> String {
        let mut text = format!("{}: {}", self.name, self.purpose);
        if !self.inputs.is_empty() {
            let inputs: Vec<String> =
                self.inputs.iter().map(|(k, v)| format!("{k}: {v}")).collect();
            text.push_str(&format!("\nInputs: {}", inputs.join(", ")));
        }
        if !self.outputs.is_empty() {
            let outputs: Vec<String> =
                self.outputs.iter().map(|(k, v)| format!("{k}: {v}")).collect();
            text.push_str(&format!("\nOutputs: {}", outputs.join(", ")));
        }
        if !self.constraints.is_empty() {
            let constraints: Vec<&str> = self.constraints.iter().map(String::as_str).collect();
            text.push_str(&format!("\nConstraints: {}", constraints.join(", ")));
        }
        text.push_str(&format!(
            "\nSecurity level: {}, performance tier: {}",
            self.security_level, self.performance_tier
        ));
        text
    }
}
