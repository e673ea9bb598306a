// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM-backed Code Generator
//
// Renders the generation prompt, sends it through the provider registry and
// parses the reply. Preferred reply shape is the JSON object
// {code, declared_dependencies, external_library_refs}; a reply without one
// falls back to its first fenced code block.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::config::GeneratorConfig;
use crate::domain::generation::{CodeGenerator, GeneratedCode, GenerationError, GenerationRequest};
use crate::domain::llm::CompletionOptions;
use crate::infrastructure::llm::{extract_code_block, extract_json, ProviderRegistry};
use crate::infrastructure::prompt_template_engine::{PromptContext, PromptTemplateEngine};

pub struct LlmCodeGenerator {
    registry: Arc<ProviderRegistry>,
    templates: PromptTemplateEngine,
    config: GeneratorConfig,
}

impl LlmCodeGenerator {
    pub fn new(registry: Arc<ProviderRegistry>, config: GeneratorConfig) -> Self {
        Self {
            registry,
            templates: PromptTemplateEngine::new(),
            config,
        }
    }

    pub fn render_prompt(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        let context = PromptContext::for_generation(request);
        self.templates.render_with_fallback(
            self.config.prompt_template.as_deref(),
            PromptTemplateEngine::generation_template(),
            &context,
        )
    }
}

#[async_trait]
impl CodeGenerator for LlmCodeGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedCode, GenerationError> {
        let prompt = self
            .render_prompt(request)
            .map_err(|e| GenerationError::Provider(format!("{e:#}")))?;

        let options = CompletionOptions {
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            stop_sequences: None,
            json_response: true,
        };

        let completion = self
            .registry
            .complete(&self.config.model, &prompt, &options)
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        debug!(
            task_id = %request.context.task_id(),
            model = %completion.model,
            tokens = completion.usage.total_tokens,
            "Generation reply received"
        );

        parse_generation_reply(&completion.text)
    }
}

pub fn parse_generation_reply(text: &str) -> Result<GeneratedCode, GenerationError> {
    if let Some(json) = extract_json(text) {
        if let Ok(generated) = serde_json::from_str::<GeneratedCode>(&json) {
            if !generated.code.trim().is_empty() {
                return Ok(generated);
            }
        }
    }

    if let Some(code) = extract_code_block(text) {
        return Ok(GeneratedCode {
            code,
            declared_dependencies: Vec::new(),
            external_library_refs: Vec::new(),
        });
    }

    Err(GenerationError::MalformedOutput(
        "reply holds neither a code JSON object nor a fenced code block".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::LLMSelection;
    use crate::domain::generation::{GenerationMode, InferenceContext};
    use crate::domain::llm::{Completion, FinishReason, LLMError, LLMProvider, TokenUsage};
    use crate::domain::task::AtomicTask;
    use std::collections::BTreeMap;
    use tokio::sync::Mutex;

    struct EchoProvider {
        reply: String,
        prompts: Mutex<Vec<(String, CompletionOptions)>>,
    }

    #[async_trait]
    impl LLMProvider for EchoProvider {
        async fn complete(
            &self,
            prompt: &str,
            options: &CompletionOptions,
        ) -> Result<Completion, LLMError> {
            self.prompts.lock().await.push((prompt.to_string(), options.clone()));
            Ok(Completion {
                text: self.reply.clone(),
                usage: TokenUsage::default(),
                provider: "echo".to_string(),
                model: "echo".to_string(),
                finish_reason: FinishReason::Stop,
            })
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Ok(())
        }
    }

    fn request() -> GenerationRequest {
        let task = AtomicTask::new("sum", "Sum a list of integers").with_output("total", "i64");
        GenerationRequest {
            mode: GenerationMode::Scratch,
            signature: task.signature(),
            context: InferenceContext::for_task(&task, BTreeMap::new()),
        }
    }

    #[test]
    fn test_parse_json_reply() {
        let reply = concat!(
            r#"{"code": "fn sum(xs: &[i64]) -> i64 { xs.iter().sum() }", "#,
            r#""declared_dependencies": ["std"]}"#,
        );
        let generated = parse_generation_reply(reply).unwrap();
        assert!(generated.code.starts_with("fn sum"));
        assert_eq!(generated.declared_dependencies, vec!["std"]);
        assert!(generated.external_library_refs.is_empty());
    }

    #[test]
    fn test_parse_falls_back_to_code_block() {
        let reply = "Sure:\n```rust\nfn sum(xs: &[i64]) -> i64 { xs.iter().sum() }\n```";
        let generated = parse_generation_reply(reply).unwrap();
        assert_eq!(generated.code, "fn sum(xs: &[i64]) -> i64 { xs.iter().sum() }");
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(matches!(
            parse_generation_reply("I cannot help with that."),
            Err(GenerationError::MalformedOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_uses_configured_alias_and_json_mode() {
        let provider = Arc::new(EchoProvider {
            reply: r#"{"code": "fn sum() {}"}"#.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let mut registry = ProviderRegistry::new(&LLMSelection::default());
        registry.register("echo", "coder", provider.clone());

        let config = GeneratorConfig {
            model: "coder".to_string(),
            temperature: 0.1,
            ..GeneratorConfig::default()
        };
        let generator = LlmCodeGenerator::new(Arc::new(registry), config);
        let generated = generator.generate(&request()).await.unwrap();

        assert_eq!(generated.code, "fn sum() {}");
        let prompts = provider.prompts.lock().await;
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.contains("Purpose: sum a list of integers"));
        assert!(prompts[0].1.json_response);
        assert_eq!(prompts[0].1.temperature, Some(0.1));
    }

    #[tokio::test]
    async fn test_unknown_alias_is_provider_error() {
        let registry = ProviderRegistry::new(&LLMSelection::default());
        let generator = LlmCodeGenerator::new(Arc::new(registry), GeneratorConfig::default());
        assert!(matches!(
            generator.generate(&request()).await,
            Err(GenerationError::Provider(_))
        ));
    }
}
