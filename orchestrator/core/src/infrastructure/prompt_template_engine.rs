// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Prompt Template Engine
//!
//! Handlebars rendering for the generation and judge prompts.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Turn a generation request or a judge call into prompt text
//! - **Integration:** `LlmCodeGenerator` / `LlmJudge` -> `ProviderRegistry`
//!
//! # Supported Placeholders
//!
//! - `{{task_name}}`, `{{purpose}}`, `{{domain}}`
//! - `{{#each inputs}}` / `{{#each outputs}}` - `name`, `type_name`
//! - `{{#each constraints}}`
//! - `{{security_level}}`, `{{performance_tier}}`, `{{complexity}}`, `{{estimated_size}}`
//! - `{{#each dependencies}}` - `id`, `purpose`, `code`
//! - `{{attempt}}`, `{{previous_error}}`
//! - `{{exemplar}}`, `{{exemplar_score}}` (adapt mode only)
//! - `{{code}}`, `{{task_description}}`, `{{focus}}` (judge prompts)
//!
//! Values are inserted verbatim; HTML escaping is disabled.

use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::generation::GenerationRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptField {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDependency {
    pub id: String,
    pub purpose: String,
    pub outputs: Vec<PromptField>,
    pub code: String,
}

/// Context data for prompt template rendering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    pub inputs: Vec<PromptField>,
    pub outputs: Vec<PromptField>,
    pub constraints: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_tier: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_size: Option<u32>,

    pub dependencies: Vec<PromptDependency>,

    /// 1-based.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_error: Option<String>,

    /// Stored implementation to adapt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exemplar: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exemplar_score: Option<f64>,

    /// True for HIGH and CRITICAL security tasks.
    pub strict: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,

    #[serde(flatten)]
    pub extras: HashMap<String, serde_json::Value>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything the generator prompt needs from one request.
    pub fn for_generation(request: &GenerationRequest) -> Self {
        let signature = &request.signature;
        let context = &request.context;
        let fields = |map: &std::collections::BTreeMap<String, String>| {
            map.iter()
                .map(|(name, type_name)| PromptField {
                    name: name.clone(),
                    type_name: type_name.clone(),
                })
                .collect::<Vec<_>>()
        };

        let dependencies = context
            .dependency_outputs()
            .iter()
            .map(|(id, output)| PromptDependency {
                id: id.to_string(),
                purpose: output.purpose.clone(),
                outputs: fields(&output.outputs),
                code: output.code.clone(),
            })
            .collect();

        let mut prompt = Self {
            task_name: Some(context.task_name().to_string()),
            purpose: Some(signature.purpose().to_string()),
            domain: Some(signature.domain().to_string()),
            inputs: fields(signature.inputs()),
            outputs: fields(signature.outputs()),
            constraints: signature.constraints().iter().cloned().collect(),
            security_level: Some(signature.security_level().to_string()),
            performance_tier: Some(signature.performance_tier().to_string()),
            complexity: Some(context.complexity()),
            estimated_size: Some(context.estimated_size()),
            dependencies,
            attempt: Some(context.attempt()),
            previous_error: context.previous_error().map(str::to_string),
            strict: signature.security_level() >= crucible_cortex::SecurityLevel::High,
            ..Self::default()
        };

        if let crate::domain::generation::GenerationMode::Adapt {
            exemplar, score, ..
        } = &request.mode
        {
            prompt.exemplar = Some(exemplar.code.clone());
            prompt.exemplar_score = Some(*score);
        }

        prompt
    }

    pub fn for_judge(code: &str, task_description: &str, focus: Option<&str>) -> Self {
        Self {
            code: Some(code.to_string()),
            task_description: Some(task_description.to_string()),
            focus: focus.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn previous_error(mut self, error: impl Into<String>) -> Self {
        self.previous_error = Some(error.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

pub struct PromptTemplateEngine {
    handlebars: Handlebars<'static>,
}

impl PromptTemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Code and error text must reach the model unescaped.
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    pub fn render(&self, template: &str, context: &PromptContext) -> Result<String> {
        self.handlebars
            .render_template(template, context)
            .context("Failed to render prompt template")
    }

    /// Render `template` when given, `default` otherwise.
    pub fn render_with_fallback(
        &self,
        template: Option<&str>,
        default: &str,
        context: &PromptContext,
    ) -> Result<String> {
        self.render(template.unwrap_or(default), context)
    }

    pub fn validate_template(&self, template: &str) -> Result<()> {
        handlebars::template::Template::compile(template)
            .map(|_| ())
            .context("Invalid Handlebars template syntax")
    }

    pub fn generation_template() -> &'static str {
        GENERATION_TEMPLATE
    }

    pub fn judge_template() -> &'static str {
        JUDGE_TEMPLATE
    }
}

impl Default for PromptTemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

const GENERATION_TEMPLATE: &str = r#"You are implementing one atomic unit of a larger program.

Task: {{task_name}}
Purpose: {{purpose}}
Domain: {{domain}}
{{#if inputs}}Inputs:
{{#each inputs}}- {{name}}: {{type_name}}
{{/each}}{{/if}}{{#if outputs}}Outputs:
{{#each outputs}}- {{name}}: {{type_name}}
{{/each}}{{/if}}{{#if constraints}}Constraints:
{{#each constraints}}- {{this}}
{{/each}}{{/if}}Security level: {{security_level}}
Performance tier: {{performance_tier}}
Complexity: {{complexity}}
Estimated size: {{estimated_size}} lines
{{#if strict}}
This task is security {{security_level}}. Validate every input, never log secrets,
avoid unsafe constructs and fail closed.
{{/if}}{{#if dependencies}}
Already implemented upstream units you may call:
{{#each dependencies}}
### {{id}}: {{purpose}}
```
{{code}}
```
{{/each}}{{/if}}{{#if exemplar}}
A previously validated implementation of a very similar task follows
(similarity {{exemplar_score}}). Adapt it with the smallest changes that satisfy this task:
```
{{exemplar}}
```
{{/if}}{{#if previous_error}}
Attempt {{attempt}}. The previous attempt was rejected:
{{previous_error}}
Fix every issue listed above.
{{/if}}
Reply with a single JSON object:
{"code": "<source>", "declared_dependencies": ["<crate>"], "external_library_refs": ["<item>"]}"#;

const JUDGE_TEMPLATE: &str = r#"You are reviewing a generated implementation.

Task:
{{task_description}}
{{#if focus}}
Review focus: {{focus}}
{{/if}}
Implementation:
```
{{code}}
```

Decide whether the implementation correctly and safely fulfils the task.
Reply with a single JSON object:
{"approved": true|false, "score": <0.0-1.0>, "issues": ["<issue>"]}"#;
