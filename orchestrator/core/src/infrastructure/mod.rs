// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod llm;
pub mod llm_generator;
pub mod llm_judge;
pub mod plan_repository;
pub mod prompt_template_engine;

pub use event_bus::{DomainEvent, EventBus, EventBusError, EventReceiver, RunEventReceiver};
pub use llm::ProviderRegistry;
pub use llm_generator::LlmCodeGenerator;
pub use llm_judge::LlmJudge;
pub use plan_repository::InMemoryPlanRepository;
pub use prompt_template_engine::{PromptContext, PromptTemplateEngine};
