// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Core Configuration - Kubernetes-style manifest (apiVersion/kind/metadata/spec)
//
// Every tunable constant of the pipeline lives here:
// - pattern bank scoring weights and storage threshold
// - inference match/reuse thresholds
// - ensemble voting threshold, disagreement delta, judge timeout
// - orchestration retries, parallelism, per-task timeout
// - LLM providers with model aliases, the generator and the judge panel

use crucible_cortex::PatternBankConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "CoreConfig";
pub const CONFIG_PATH_ENV: &str = "CRUCIBLE_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: CoreConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfigSpec {
    #[serde(default)]
    pub pattern_bank: PatternBankConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    #[serde(default)]
    pub llm_providers: Vec<LLMProviderConfig>,

    #[serde(default)]
    pub llm_selection: LLMSelection,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub judges: Vec<JudgeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Minimum combined score for a pattern to count as a match at all.
    pub match_threshold: f64,
    /// Minimum combined score for the best match to be adapted instead of
    /// generating from scratch.
    pub reuse_threshold: f64,
    pub match_limit: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.85,
            reuse_threshold: 0.92,
            match_limit: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub voting_threshold: f64,
    /// Max-min judge score spread above which the verdict is a disagreement.
    pub disagreement_delta: f64,
    #[serde(with = "humantime_serde")]
    pub judge_timeout: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            voting_threshold: 0.66,
            disagreement_delta: 0.5,
            judge_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Total attempts per task, including the first.
    pub max_retries: u32,
    /// Concurrent tasks within one level.
    pub max_parallel: usize,
    /// Budget for one inference + validation attempt.
    #[serde(with = "humantime_serde")]
    pub task_timeout: Duration,
    pub skip_dependents_of_failed: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_parallel: 4,
            task_timeout: Duration::from_secs(300),
            skip_dependents_of_failed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMProviderConfig {
    pub name: String,

    /// "openai", "openai-compatible" or "ollama".
    #[serde(rename = "type")]
    pub provider_type: String,

    pub endpoint: String,

    /// Literal key or "env:VAR_NAME".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Name used by `generator.model` and `judges[].model`.
    pub alias: String,

    /// Identifier sent to the provider API.
    pub model: String,

    #[serde(default)]
    pub context_window: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMSelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<String>,

    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for LLMSelection {
    fn default() -> Self {
        Self {
            fallback_provider: None,
            max_retries: default_llm_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_model_alias")]
    pub model: String,

    #[serde(default = "default_generator_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Handlebars template overriding the built-in generation prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: default_model_alias(),
            temperature: default_generator_temperature(),
            max_tokens: default_max_tokens(),
            prompt_template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    pub name: String,

    #[serde(default = "default_model_alias")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Review focus appended to the judge prompt, e.g. "security".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_llm_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    500
}

fn default_model_alias() -> String {
    "default".to_string()
}

fn default_generator_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "crucible".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: CoreConfigSpec::default(),
        }
    }
}

impl CoreConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CRUCIBLE_CONFIG_PATH environment variable
    /// 2. ./crucible-config.yaml (working directory)
    /// 3. ~/.crucible/config.yaml (user home)
    /// 4. /etc/crucible/config.yaml (system, Unix) or C:\ProgramData\Crucible\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!("{} points to a missing file: {:?}", CONFIG_PATH_ENV, path);
        }

        let cwd = PathBuf::from("./crucible-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".crucible").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/crucible/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Crucible\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default.
    /// An explicit path must exist and parse.
    pub fn load_or_default(explicit_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = explicit_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::warn!(
                    "No configuration file found in standard locations. Using defaults."
                );
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment overrides for container deployments.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<usize>("CRUCIBLE_MAX_PARALLEL") {
            tracing::info!("Environment override: CRUCIBLE_MAX_PARALLEL={}", value);
            self.spec.orchestration.max_parallel = value;
        }
        if let Some(value) = env_parse::<u32>("CRUCIBLE_MAX_RETRIES") {
            tracing::info!("Environment override: CRUCIBLE_MAX_RETRIES={}", value);
            self.spec.orchestration.max_retries = value;
        }
        if let Some(value) = env_parse::<f64>("CRUCIBLE_STORAGE_THRESHOLD") {
            tracing::info!("Environment override: CRUCIBLE_STORAGE_THRESHOLD={}", value);
            self.spec.pattern_bank.storage_threshold = value;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        check_unit("pattern_bank.storage_threshold", spec.pattern_bank.storage_threshold)?;
        check_unit("pattern_bank.vector_weight", spec.pattern_bank.vector_weight)?;
        check_unit("pattern_bank.structural_weight", spec.pattern_bank.structural_weight)?;
        let weight_sum = spec.pattern_bank.vector_weight + spec.pattern_bank.structural_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            anyhow::bail!(
                "pattern_bank vector_weight + structural_weight must equal 1.0 (got {})",
                weight_sum
            );
        }
        if spec.pattern_bank.over_fetch_factor == 0 {
            anyhow::bail!("pattern_bank.over_fetch_factor must be at least 1");
        }

        check_unit("inference.match_threshold", spec.inference.match_threshold)?;
        check_unit("inference.reuse_threshold", spec.inference.reuse_threshold)?;
        if spec.inference.reuse_threshold < spec.inference.match_threshold {
            anyhow::bail!(
                "inference.reuse_threshold ({}) cannot be below inference.match_threshold ({})",
                spec.inference.reuse_threshold,
                spec.inference.match_threshold
            );
        }
        if spec.inference.match_limit == 0 {
            anyhow::bail!("inference.match_limit must be at least 1");
        }

        check_unit("validation.voting_threshold", spec.validation.voting_threshold)?;
        check_unit("validation.disagreement_delta", spec.validation.disagreement_delta)?;
        if spec.validation.judge_timeout.is_zero() {
            anyhow::bail!("validation.judge_timeout must be greater than zero");
        }

        if spec.orchestration.max_retries == 0 {
            anyhow::bail!("orchestration.max_retries must be at least 1");
        }
        if spec.orchestration.max_parallel == 0 {
            anyhow::bail!("orchestration.max_parallel must be at least 1");
        }
        if spec.orchestration.task_timeout.is_zero() {
            anyhow::bail!("orchestration.task_timeout must be greater than zero");
        }

        for provider in &spec.llm_providers {
            if provider.name.is_empty() {
                anyhow::bail!("LLM provider name cannot be empty");
            }
            if provider.endpoint.is_empty() {
                anyhow::bail!("LLM provider endpoint cannot be empty for: {}", provider.name);
            }
            if provider.models.is_empty() {
                anyhow::bail!("LLM provider must have at least one model: {}", provider.name);
            }
            for model in &provider.models {
                if model.alias.is_empty() {
                    anyhow::bail!("Model alias cannot be empty in provider: {}", provider.name);
                }
                if model.model.is_empty() {
                    anyhow::bail!("Model identifier cannot be empty for alias: {}", model.alias);
                }
            }
        }

        if let Some(fallback) = &spec.llm_selection.fallback_provider {
            if !spec.llm_providers.iter().any(|p| &p.name == fallback) {
                anyhow::bail!("Fallback provider '{}' not found in llm_providers", fallback);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for judge in &spec.judges {
            if judge.name.is_empty() {
                anyhow::bail!("Judge name cannot be empty");
            }
            if !seen.insert(judge.name.as_str()) {
                anyhow::bail!("Duplicate judge name: {}", judge.name);
            }
        }

        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{} must be within [0, 1] (got {})", field, value);
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid value for {}: '{}'. Ignoring.", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apiVersion: 100monkeys.ai/v1
kind: CoreConfig
metadata:
  name: test-core
spec:
  pattern_bank:
    storage_threshold: 0.9
  inference:
    reuse_threshold: 0.95
  validation:
    judge_timeout: 45s
  orchestration:
    max_parallel: 8
    task_timeout: 2m
  llm_providers:
    - name: local
      type: ollama
      endpoint: http://localhost:11434
      models:
        - alias: default
          model: qwen2.5-coder:7b
  generator:
    model: default
  judges:
    - name: correctness
    - name: security
      focus: security
"#;

    #[test]
    fn test_default_manifest() {
        let config = CoreConfig::default();
        assert_eq!(config.api_version, API_VERSION);
        assert_eq!(config.kind, KIND);
        assert_eq!(config.spec.inference.match_threshold, 0.85);
        assert_eq!(config.spec.inference.reuse_threshold, 0.92);
        assert_eq!(config.spec.validation.voting_threshold, 0.66);
        assert_eq!(config.spec.orchestration.max_retries, 3);
        assert!(config.spec.orchestration.skip_dependents_of_failed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample_with_partial_sections() {
        let config = CoreConfig::from_yaml_str(SAMPLE).unwrap();

        assert_eq!(config.metadata.name, "test-core");
        assert_eq!(config.spec.pattern_bank.storage_threshold, 0.9);
        assert_eq!(config.spec.pattern_bank.vector_weight, 0.7);
        assert_eq!(config.spec.inference.reuse_threshold, 0.95);
        assert_eq!(config.spec.inference.match_threshold, 0.85);
        assert_eq!(config.spec.validation.judge_timeout, Duration::from_secs(45));
        assert_eq!(config.spec.orchestration.task_timeout, Duration::from_secs(120));
        assert_eq!(config.spec.orchestration.max_parallel, 8);
        assert_eq!(config.spec.orchestration.max_retries, 3);
        assert_eq!(config.spec.judges.len(), 2);
        assert_eq!(config.spec.judges[1].focus.as_deref(), Some("security"));
        assert_eq!(config.spec.judges[0].model, "default");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = CoreConfig::default();
        config.spec.inference.reuse_threshold = 0.5;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.spec.orchestration.max_parallel = 0;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.spec.pattern_bank.vector_weight = 0.9;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.spec.validation.voting_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.spec.llm_selection.fallback_provider = Some("missing".to_string());
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.kind = "NodeConfig".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crucible-config.yaml");
        let mut config = CoreConfig::default();
        config.spec.orchestration.max_parallel = 2;
        config.to_yaml_file(&path).unwrap();

        let loaded = CoreConfig::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.orchestration.max_parallel, 2);
        assert_eq!(loaded.spec.validation.judge_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = CoreConfig::load_or_default(Some(dir.path().join("absent.yaml")));
        assert!(result.is_err());
    }
}
