// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Registry - Model Alias Resolution and Provider Management
//
// Maps model aliases (e.g. "default", "judge-fast") onto provider adapters.
// Transient failures are retried with exponential backoff; once retries are
// spent the configured fallback provider gets one try.

use crate::domain::config::{LLMProviderConfig, LLMSelection};
use crate::domain::llm::{Completion, CompletionOptions, LLMError, LLMProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ollama::OllamaAdapter;
use super::openai::OpenAIAdapter;

struct AliasTarget {
    provider_name: String,
    provider: Arc<dyn LLMProvider>,
}

/// Registry for managing LLM providers and resolving model aliases
pub struct ProviderRegistry {
    /// Provider name -> adapter for its first model. Used for fallback and health checks.
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    aliases: HashMap<String, AliasTarget>,
    fallback_provider: Option<String>,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl ProviderRegistry {
    pub fn new(selection: &LLMSelection) -> Self {
        Self {
            providers: HashMap::new(),
            aliases: HashMap::new(),
            fallback_provider: selection.fallback_provider.clone(),
            max_retries: selection.max_retries.max(1),
            retry_delay_ms: selection.retry_delay_ms,
        }
    }

    /// Build adapters for every enabled provider. A provider that cannot be
    /// constructed is skipped with a warning.
    pub fn from_config(
        providers: &[LLMProviderConfig],
        selection: &LLMSelection,
    ) -> anyhow::Result<Self> {
        let mut registry = Self::new(selection);

        info!("Initializing LLM provider registry");

        for provider_config in providers {
            if !provider_config.enabled {
                info!("Provider '{}' disabled, skipping", provider_config.name);
                continue;
            }

            let api_key = match Self::resolve_api_key(&provider_config.api_key) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Failed to initialize provider '{}': {}", provider_config.name, e);
                    continue;
                }
            };

            for model_config in &provider_config.models {
                match Self::create_provider(provider_config, &api_key, &model_config.model) {
                    Ok(provider) => {
                        info!(
                            "Mapping alias '{}' -> {} ({})",
                            model_config.alias, model_config.model, provider_config.name
                        );
                        registry.register(&provider_config.name, &model_config.alias, provider);
                    }
                    Err(e) => {
                        warn!("Failed to initialize provider '{}': {}", provider_config.name, e);
                        break;
                    }
                }
            }
        }

        if registry.providers.is_empty() {
            warn!(
                "No LLM providers configured - generation and judging will fail until one is added"
            );
        }

        if let Some(fallback) = &registry.fallback_provider {
            if !registry.providers.contains_key(fallback) {
                anyhow::bail!("Fallback provider '{}' is not an enabled provider", fallback);
            }
        }

        Ok(registry)
    }

    /// Register `provider` under `alias`. The first adapter registered for a
    /// provider name also serves as that provider's fallback adapter.
    pub fn register(&mut self, provider_name: &str, alias: &str, provider: Arc<dyn LLMProvider>) {
        self.providers
            .entry(provider_name.to_string())
            .or_insert_with(|| provider.clone());
        self.aliases.insert(
            alias.to_string(),
            AliasTarget {
                provider_name: provider_name.to_string(),
                provider,
            },
        );
    }

    fn create_provider(
        config: &LLMProviderConfig,
        api_key: &str,
        model: &str,
    ) -> anyhow::Result<Arc<dyn LLMProvider>> {
        let provider: Arc<dyn LLMProvider> = match config.provider_type.as_str() {
            "openai" | "openai-compatible" => Arc::new(OpenAIAdapter::new(
                config.endpoint.clone(),
                api_key.to_string(),
                model.to_string(),
            )),
            "ollama" => Arc::new(OllamaAdapter::new(config.endpoint.clone(), model.to_string())),
            _ => anyhow::bail!("Unsupported provider type: {}", config.provider_type),
        };

        Ok(provider)
    }

    /// Resolve API key from config (supports "env:VAR_NAME" syntax)
    fn resolve_api_key(key: &Option<String>) -> anyhow::Result<String> {
        match key {
            Some(k) => match k.strip_prefix("env:") {
                Some(var_name) => std::env::var(var_name)
                    .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name)),
                None => Ok(k.clone()),
            },
            // Local providers run without auth.
            None => Ok(String::new()),
        }
    }

    /// Complete `prompt` with the model behind `alias`.
    pub async fn complete(
        &self,
        alias: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, LLMError> {
        let target = self
            .aliases
            .get(alias)
            .ok_or_else(|| LLMError::ModelNotFound(format!("Model alias '{}' not found", alias)))?;

        let mut last_error = None;

        for attempt in 0..self.max_retries {
            match target.provider.complete(prompt, options).await {
                Ok(completion) => {
                    debug!(
                        alias,
                        provider = %target.provider_name,
                        attempt = attempt + 1,
                        "Completion succeeded"
                    );
                    return Ok(completion);
                }
                Err(e) => {
                    warn!(
                        "Completion failed (attempt {}/{}) on '{}': {}",
                        attempt + 1,
                        self.max_retries,
                        target.provider_name,
                        e
                    );
                    let transient = e.is_transient();
                    last_error = Some(e);
                    if !transient {
                        break;
                    }
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        if let Some(fallback) = &self.fallback_provider {
            if fallback != &target.provider_name {
                if let Some(fallback_provider) = self.providers.get(fallback) {
                    info!("Trying fallback provider: {}", fallback);
                    return fallback_provider.complete(prompt, options).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LLMError::Provider("Unknown error".into())))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }

    /// Check health of all providers
    pub async fn health_check_all(&self) -> HashMap<String, Result<(), LLMError>> {
        let mut results = HashMap::new();

        for (name, provider) in &self.providers {
            info!("Health checking provider: {}", name);
            results.insert(name.clone(), provider.health_check().await);
        }

        results
    }

    pub fn available_aliases(&self) -> Vec<String> {
        self.aliases.keys().cloned().collect()
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }
}
