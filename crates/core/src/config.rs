use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfluxError;

/// Upper bound accepted for a bounded queue.
pub const MAX_CONCURRENCY: usize = 1 << 20;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Top-level config ────────────────────────────────────────────────

/// Runtime configuration for queues and pipelines.
///
/// Parsed from TOML with support for environment variable overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub pipeline: PipelineSection,
}

// ── Section configs ─────────────────────────────────────────────────

/// Queue section: admission limits and default priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    /// Maximum number of tasks running at once. 0 = unbounded.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Priority given to submissions that don't specify one.
    #[serde(default)]
    pub default_priority: i64,
}

fn default_concurrency() -> usize {
    4
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            default_priority: 0,
        }
    }
}

impl QueueSection {
    /// `None` when the queue is unbounded.
    pub fn bounded_concurrency(&self) -> Option<usize> {
        (self.concurrency > 0).then_some(self.concurrency)
    }
}

/// Pipeline section: result delivery mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Deliver results in source order (`true`) or completion order (`false`).
    #[serde(default = "default_ordered")]
    pub ordered: bool,
}

fn default_ordered() -> bool {
    true
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            ordered: default_ordered(),
        }
    }
}

// ── Loading & Validation ────────────────────────────────────────────

impl RuntimeConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfluxError> {
        Self::from_toml_with_env(toml_str, |key| std::env::var(key).ok())
    }

    /// Parse config from a TOML string, resolving overrides through `env`.
    pub fn from_toml_with_env(
        toml_str: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfluxError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfluxError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfluxError> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `CONFLUX_SECTION_KEY` overrides `section.key`.
    /// Unparsable values are logged and ignored.
    fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env_parsed::<usize>(&env, "CONFLUX_QUEUE_CONCURRENCY") {
            self.queue.concurrency = v;
        }
        if let Some(v) = env_parsed::<i64>(&env, "CONFLUX_QUEUE_DEFAULT_PRIORITY") {
            self.queue.default_priority = v;
        }
        if let Some(v) = env_parsed::<bool>(&env, "CONFLUX_PIPELINE_ORDERED") {
            self.pipeline.ordered = v;
        }
    }

    /// Validate the config.
    pub fn validate(&self) -> Result<(), ConfluxError> {
        if self.queue.concurrency > MAX_CONCURRENCY {
            return Err(ConfluxError::Config(format!(
                "queue.concurrency {} exceeds the maximum of {MAX_CONCURRENCY}",
                self.queue.concurrency
            )));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        let concurrency = match self.queue.bounded_concurrency() {
            Some(n) => n.to_string(),
            None => "unbounded".to_string(),
        };
        tracing::info!(
            concurrency = %concurrency,
            default_priority = self.queue.default_priority,
            ordered = self.pipeline.ordered,
            "runtime config loaded"
        );
    }
}

fn env_parsed<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = env(key).filter(|s| !s.is_empty())?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable env override");
            None
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
