// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod factory;
pub mod inference;
pub mod orchestrator;
pub mod validation_service;

pub use factory::build_orchestrator;
pub use inference::{Inference, InferenceEngine, InferenceError, InferenceSource};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use validation_service::{EnsembleValidator, ValidatorError};
