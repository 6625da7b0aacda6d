//! Run configuration (`rff.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Variant;
use crate::model::{CommandModelConfig, CompletionOptions, RetryPolicy};

/// Run configuration (TOML).
///
/// Missing fields fall back to defaults. Values outside their documented
/// ranges are rejected by [`RunConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Controller variant to run.
    pub variant: Variant,

    /// Hard stop on planning iterations (> 0).
    pub max_iterations: u32,

    /// Model identifier passed to the model capability.
    pub model_identifier: String,

    /// Sampling temperature in `[0, 1]`.
    pub sampling_temperature: f32,

    /// When false, a run that exhausts its budget while the goal holds
    /// locally is reported as accepted (unverified).
    pub require_verified_goal: bool,

    /// Extra proposer calls per iteration after a parse failure or an avoided
    /// candidate.
    pub parse_retries: u32,

    /// Consecutive failed completions (after the retry decorator gave up)
    /// before the run is aborted.
    pub max_consecutive_completion_failures: u32,

    /// Byte bound for the workspace summary in results and prompts.
    pub summary_budget_bytes: usize,

    /// Byte bound for a rendered prompt before droppable sections go.
    pub prompt_budget_bytes: usize,

    pub retry: RetryConfig,

    pub model: CommandModelConfig,
}

/// `[retry]` section: exponential backoff around each completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        if self.max_retries == 0 {
            return RetryPolicy::None;
        }
        RetryPolicy::exponential(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.multiplier,
        )
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            variant: Variant::Dag,
            max_iterations: 16,
            model_identifier: "gpt-4o-mini".to_string(),
            sampling_temperature: 0.2,
            require_verified_goal: true,
            parse_retries: 2,
            max_consecutive_completion_failures: 3,
            summary_budget_bytes: 4_000,
            prompt_budget_bytes: 16_000,
            retry: RetryConfig::default(),
            model: CommandModelConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.model_identifier.trim().is_empty() {
            return Err(anyhow!("model_identifier must be non-empty"));
        }
        if !(0.0..=1.0).contains(&self.sampling_temperature) {
            return Err(anyhow!(
                "sampling_temperature must be within [0, 1] (got {})",
                self.sampling_temperature
            ));
        }
        if self.max_consecutive_completion_failures == 0 {
            return Err(anyhow!("max_consecutive_completion_failures must be > 0"));
        }
        if self.summary_budget_bytes == 0 {
            return Err(anyhow!("summary_budget_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(anyhow!("retry.multiplier must be >= 1.0"));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(anyhow!(
                "retry.max_backoff_ms must be >= retry.initial_backoff_ms"
            ));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.model_identifier.clone(),
            temperature: self.sampling_temperature,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
