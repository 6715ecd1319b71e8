//! Run configuration.
//!
//! A run is described by one immutable [`RunConfig`], built once at the
//! boundary (YAML file and/or CLI flags) and passed explicitly to the runner.

use crate::prompt::Message;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Extra context file {path} holds {available} messages, {requested} requested")]
    ExtraContextTooShort {
        path: String,
        requested: usize,
        available: usize,
    },
}

const fn default_trials() -> usize {
    10
}
fn default_depths() -> Vec<u32> {
    (2..=10).collect()
}
const fn default_max_attempts() -> u32 {
    3
}
const fn default_retry_delay_ms() -> u64 {
    1000
}
const fn default_timeout_ms() -> u64 {
    120_000
}
const fn default_seed() -> u64 {
    42
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}
fn default_aggregate_path() -> PathBuf {
    PathBuf::from("aggregate.jsonl")
}

/// Fixed dialogue injected before every prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtraContextConfig {
    /// YAML file holding a list of `{role, content}` messages
    pub path: PathBuf,
    /// Number of leading messages to inject
    pub size: usize,
}

/// Loaded extra-context dialogue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraContext {
    /// Size marker recorded in the ledgers
    pub size: usize,
    /// Messages in order
    pub messages: Vec<Message>,
}

impl ExtraContext {
    /// Load the first `config.size` messages from `config.path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds fewer
    /// than `size` messages.
    pub fn load(config: &ExtraContextConfig) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&config.path)?;
        Self::from_yaml(&content, config.size, &config.path.display().to_string())
    }

    /// Parse a YAML message list and keep the first `size` messages
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or too short.
    pub fn from_yaml(yaml: &str, size: usize, origin: &str) -> Result<Self, ConfigError> {
        let mut messages: Vec<Message> = serde_yaml::from_str(yaml)?;
        if messages.len() < size {
            return Err(ConfigError::ExtraContextTooShort {
                path: origin.to_string(),
                requested: size,
                available: messages.len(),
            });
        }
        messages.truncate(size);
        Ok(Self { size, messages })
    }
}

/// Subprocess command used to reach a model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandConfig {
    /// Adapter name
    pub name: String,
    /// Executable to invoke
    pub command: String,
    /// Argument template; `{model}`, `{prompt}`, `{reasoning_effort}` and
    /// provider parameter names are substituted per argument
    pub args_template: String,
}

impl CommandConfig {
    /// `llm` CLI (`llm -m <model> <prompt>`)
    #[must_use]
    pub fn llm() -> Self {
        Self {
            name: "llm".to_string(),
            command: "llm".to_string(),
            args_template: "-m {model} --no-stream \"{prompt}\"".to_string(),
        }
    }

    /// Local ollama model (`ollama run <model> <prompt>`)
    #[must_use]
    pub fn ollama() -> Self {
        Self {
            name: "ollama".to_string(),
            command: "ollama".to_string(),
            args_template: "run {model} \"{prompt}\"".to_string(),
        }
    }

    /// Look up a preset by name
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "llm" => Some(Self::llm()),
            "ollama" => Some(Self::ollama()),
            _ => None,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self::llm()
    }
}

/// Complete, immutable description of one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    /// Model identifier (or alias)
    pub model: String,
    /// Target number of trials in every (variant, depth) cell
    #[serde(default = "default_trials")]
    pub trials_per_cell: usize,
    /// Digit depths, in test order
    #[serde(default = "default_depths")]
    pub depths: Vec<u32>,
    /// Invocation attempts per trial
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay; doubles on each retry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Reasoning-effort hint passed to the model
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// Fixed dialogue injected before every prompt
    #[serde(default)]
    pub extra_context: Option<ExtraContextConfig>,
    /// System prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Per-invocation timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Base seed for operand generation
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Directory for trial ledgers
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Aggregate ledger path
    #[serde(default = "default_aggregate_path")]
    pub aggregate_path: PathBuf,
    /// Existing trial ledger to resume
    #[serde(default)]
    pub resume: Option<PathBuf>,
    /// Provider-specific parameter overrides
    #[serde(default)]
    pub provider_params: BTreeMap<String, String>,
    /// Subprocess adapter settings
    #[serde(default)]
    pub client: CommandConfig,
}

impl RunConfig {
    /// Configuration with defaults for everything but the model
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            trials_per_cell: default_trials(),
            depths: default_depths(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_delay_ms(),
            reasoning_effort: None,
            extra_context: None,
            system_prompt: None,
            timeout_ms: default_timeout_ms(),
            seed: default_seed(),
            output_dir: default_output_dir(),
            aggregate_path: default_aggregate_path(),
            resume: None,
            provider_params: BTreeMap::new(),
            client: CommandConfig::default(),
        }
    }

    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Check the run parameters
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::MissingField("model".to_string()));
        }
        if self.trials_per_cell == 0 {
            return Err(ConfigError::Invalid(
                "trials_per_cell must be at least 1".to_string(),
            ));
        }
        if self.depths.is_empty() {
            return Err(ConfigError::Invalid("depths must not be empty".to_string()));
        }
        if let Some(depth) = self.depths.iter().find(|d| **d == 0) {
            return Err(ConfigError::Invalid(format!(
                "depth {depth} is invalid, depths start at 1"
            )));
        }
        let mut seen = self.depths.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.depths.len() {
            return Err(ConfigError::Invalid("depths must be distinct".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy derived from the attempt and delay settings
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    /// Per-invocation timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Extra-context size marker (`None` when no extra context is used)
    #[must_use]
    pub fn extra_context_size(&self) -> Option<usize> {
        self.extra_context.as_ref().map(|c| c.size)
    }

    /// Path of a fresh trial ledger for a run started at `started_at`
    #[must_use]
    pub fn ledger_path(&self, started_at: DateTime<Utc>) -> PathBuf {
        let mut name = format!(
            "{}_{}",
            sanitize_model(&self.model),
            started_at.format("%Y-%m-%d_%H-%M-%S")
        );
        if let Some(size) = self.extra_context_size() {
            name.push_str(&format!("_ctx{size}"));
        }
        name.push_str(".jsonl");
        self.output_dir.join(name)
    }
}

/// File-name-safe model identifier
#[must_use]
pub fn sanitize_model(model: &str) -> String {
    model
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' => '_',
            c => c,
        })
        .collect()
}
