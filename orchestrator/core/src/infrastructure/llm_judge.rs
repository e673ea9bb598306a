// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM-backed Judge
//
// One reviewer of the ensemble. Each configured judge gets its own model
// alias, temperature and optional review focus.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::config::JudgeConfig;
use crate::domain::llm::CompletionOptions;
use crate::domain::validation::{Judge, JudgeError, JudgeVerdict};
use crate::infrastructure::llm::{extract_json, ProviderRegistry};
use crate::infrastructure::prompt_template_engine::{PromptContext, PromptTemplateEngine};

#[derive(Deserialize)]
struct RawVerdict {
    approved: bool,
    score: f64,
    #[serde(default)]
    issues: Vec<String>,
}

pub struct LlmJudge {
    registry: Arc<ProviderRegistry>,
    templates: PromptTemplateEngine,
    config: JudgeConfig,
}

impl LlmJudge {
    pub fn new(registry: Arc<ProviderRegistry>, config: JudgeConfig) -> Self {
        Self {
            registry,
            templates: PromptTemplateEngine::new(),
            config,
        }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn judge(&self, code: &str, task_description: &str) -> Result<JudgeVerdict, JudgeError> {
        let context =
            PromptContext::for_judge(code, task_description, self.config.focus.as_deref());
        let prompt = self
            .templates
            .render_with_fallback(
                self.config.prompt_template.as_deref(),
                PromptTemplateEngine::judge_template(),
                &context,
            )
            .map_err(|e| JudgeError::Provider(format!("{e:#}")))?;

        let options = CompletionOptions::default()
            .with_temperature(self.config.temperature)
            .json();

        let completion = self
            .registry
            .complete(&self.config.model, &prompt, &options)
            .await
            .map_err(|e| JudgeError::Provider(e.to_string()))?;

        parse_verdict(&completion.text)
    }
}

pub fn parse_verdict(text: &str) -> Result<JudgeVerdict, JudgeError> {
    let json = extract_json(text)
        .ok_or_else(|| JudgeError::MalformedVerdict("no JSON object in reply".to_string()))?;
    let raw: RawVerdict = serde_json::from_str(&json)
        .map_err(|e| JudgeError::MalformedVerdict(format!("{e}: {json}")))?;
    Ok(JudgeVerdict {
        approved: raw.approved,
        score: raw.score,
        issues: raw.issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::LLMSelection;
    use crate::domain::llm::{Completion, FinishReason, LLMError, LLMProvider, TokenUsage};

    struct FixedProvider(&'static str);

    #[async_trait]
    impl LLMProvider for FixedProvider {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<Completion, LLMError> {
            Ok(Completion {
                text: self.0.to_string(),
                usage: TokenUsage::default(),
                provider: "fixed".to_string(),
                model: "fixed".to_string(),
                finish_reason: FinishReason::Stop,
            })
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Ok(())
        }
    }

    fn judge_with_reply(reply: &'static str) -> LlmJudge {
        let mut registry = ProviderRegistry::new(&LLMSelection::default());
        registry.register("fixed", "default", Arc::new(FixedProvider(reply)));
        LlmJudge::new(
            Arc::new(registry),
            JudgeConfig {
                name: "security".to_string(),
                model: "default".to_string(),
                temperature: 0.0,
                focus: Some("security".to_string()),
                prompt_template: None,
            },
        )
    }

    #[tokio::test]
    async fn test_judge_parses_fenced_verdict() {
        let judge = judge_with_reply(
            "```json\n{\"approved\": false, \"score\": 0.4, \"issues\": [\"sql injection\"]}\n```",
        );
        let verdict = judge.judge("fn q() {}", "q: run a query").await.unwrap();

        assert_eq!(judge.name(), "security");
        assert!(!verdict.approved);
        assert_eq!(verdict.score, 0.4);
        assert_eq!(verdict.issues, vec!["sql injection"]);
    }

    #[tokio::test]
    async fn test_judge_rejects_unstructured_reply() {
        let judge = judge_with_reply("Looks fine to me!");
        assert!(matches!(
            judge.judge("fn q() {}", "q").await,
            Err(JudgeError::MalformedVerdict(_))
        ));
    }

    #[test]
    fn test_missing_issues_default_to_empty() {
        let verdict = parse_verdict(r#"{"approved": true, "score": 0.9}"#).unwrap();
        assert!(verdict.issues.is_empty());
    }
}
