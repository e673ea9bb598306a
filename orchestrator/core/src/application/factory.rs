// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestrator wiring from a [`CoreConfig`].
//!
//! [`build_orchestrator`] creates the LLM-backed generator and judges;
//! [`build_orchestrator_with`] accepts caller-supplied collaborators and
//! only assembles the pattern bank, validator and inference engine around
//! them.

use std::sync::Arc;

use anyhow::Context;
use crucible_cortex::{
    HashingEmbedder, InMemoryVectorIndex, PatternBank, PatternBankConfig, StandardPatternBank,
};
use tracing::{info, warn};

use crate::application::inference::InferenceEngine;
use crate::application::orchestrator::Orchestrator;
use crate::application::validation_service::EnsembleValidator;
use crate::domain::config::CoreConfig;
use crate::domain::generation::CodeGenerator;
use crate::domain::validation::Judge;
use crate::infrastructure::llm::ProviderRegistry;
use crate::infrastructure::llm_generator::LlmCodeGenerator;
use crate::infrastructure::llm_judge::LlmJudge;
use crate::infrastructure::prompt_template_engine::PromptTemplateEngine;

pub fn build_orchestrator(config: &CoreConfig) -> anyhow::Result<Orchestrator> {
    config.validate().context("invalid core configuration")?;

    let spec = &config.spec;
    let templates = PromptTemplateEngine::new();
    if let Some(template) = &spec.generator.prompt_template {
        templates
            .validate_template(template)
            .context("generator.prompt_template")?;
    }
    for judge in &spec.judges {
        if let Some(template) = &judge.prompt_template {
            templates
                .validate_template(template)
                .with_context(|| format!("judges[{}].prompt_template", judge.name))?;
        }
    }

    let registry = Arc::new(ProviderRegistry::from_config(
        &spec.llm_providers,
        &spec.llm_selection,
    )?);
    let judge_models = spec.judges.iter().map(|j| &j.model);
    for alias in std::iter::once(&spec.generator.model).chain(judge_models) {
        if !registry.has_alias(alias) {
            warn!(alias = %alias, "Model alias is not served by any enabled provider");
        }
    }

    let generator: Arc<dyn CodeGenerator> =
        Arc::new(LlmCodeGenerator::new(registry.clone(), spec.generator.clone()));
    let judges: Vec<Arc<dyn Judge>> = spec
        .judges
        .iter()
        .map(|judge| Arc::new(LlmJudge::new(registry.clone(), judge.clone())) as Arc<dyn Judge>)
        .collect();

    build_orchestrator_with(config, generator, judges)
}

pub fn build_orchestrator_with(
    config: &CoreConfig,
    generator: Arc<dyn CodeGenerator>,
    judges: Vec<Arc<dyn Judge>>,
) -> anyhow::Result<Orchestrator> {
    let spec = &config.spec;
    let pattern_bank = build_pattern_bank(&spec.pattern_bank);
    let validator = EnsembleValidator::new(judges, spec.validation.clone())?;
    let inference = InferenceEngine::new(pattern_bank.clone(), generator, spec.inference.clone());

    info!(
        judges = validator.judge_count(),
        max_parallel = spec.orchestration.max_parallel,
        max_retries = spec.orchestration.max_retries,
        "Orchestrator assembled"
    );

    Ok(Orchestrator::new(
        inference,
        validator,
        pattern_bank,
        spec.orchestration.clone(),
    ))
}

/// In-process pattern bank: hashing embedder over an in-memory index.
pub fn build_pattern_bank(config: &PatternBankConfig) -> Arc<dyn PatternBank> {
    Arc::new(StandardPatternBank::with_config(
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(HashingEmbedder::new()),
        config.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{JudgeConfig, LLMProviderConfig, ModelConfig};

    fn judge(name: &str) -> JudgeConfig {
        JudgeConfig {
            name: name.to_string(),
            model: "default".to_string(),
            temperature: 0.0,
            focus: None,
            prompt_template: None,
        }
    }

    fn configured() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.spec.llm_providers = vec![LLMProviderConfig {
            name: "local".to_string(),
            provider_type: "ollama".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
            enabled: true,
            models: vec![ModelConfig {
                alias: "default".to_string(),
                model: "qwen2.5-coder".to_string(),
                context_window: None,
            }],
        }];
        config.spec.judges = vec![judge("correctness"), judge("security")];
        config
    }

    #[test]
    fn test_builds_from_configuration() {
        let orchestrator = build_orchestrator(&configured()).unwrap();
        assert_eq!(orchestrator.config().max_retries, 3);
        assert!((orchestrator.pattern_bank().storage_threshold() - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_requires_judges() {
        let mut config = configured();
        config.spec.judges.clear();
        assert!(build_orchestrator(&config).is_err());
    }

    #[test]
    fn test_rejects_broken_prompt_template() {
        let mut config = configured();
        config.spec.generator.prompt_template = Some("{{purpose".to_string());
        assert!(build_orchestrator(&config).is_err());
    }

    #[test]
    fn test_rejects_invalid_thresholds() {
        let mut config = configured();
        config.spec.inference.reuse_threshold = 0.5;
        assert!(build_orchestrator(&config).is_err());
    }
}
