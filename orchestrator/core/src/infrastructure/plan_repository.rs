// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-Memory Plan Repository
//
// Keeps executed plans for the lifetime of the process.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::dag::Dag;
use crate::domain::execution::RunId;
use crate::domain::repository::{PlanRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryPlanRepository {
    plans: RwLock<HashMap<RunId, Dag>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn save(&self, run_id: RunId, dag: &Dag) -> Result<(), RepositoryError> {
        self.plans.write().insert(run_id, dag.clone());
        Ok(())
    }

    async fn find(&self, run_id: RunId) -> Result<Option<Dag>, RepositoryError> {
        Ok(self.plans.read().get(&run_id).cloned())
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, RepositoryError> {
        Ok(self.plans.read().keys().copied().collect())
    }
}
