use crate::upload::store::DuplicatePolicy;
use crate::upload::transfer::StepSchedule;
use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";

/// Session settings, read from `config.toml`. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct UploadConfig {
    /// Milliseconds between simulated progress steps.
    pub step_interval_ms: u64,
    /// Smallest simulated step, in percent.
    pub min_step: u8,
    /// Largest simulated step, in percent.
    pub max_step: u8,
    /// Fixed seed for simulated steps; random when unset.
    pub seed: Option<u64>,
    /// Start transferring as soon as files are added. When off, files wait
    /// for an explicit submit.
    pub auto_start: bool,
    pub duplicate_policy: DuplicatePolicy,
    /// A transfer with no progress for this long is marked failed.
    pub stall_timeout_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let schedule = StepSchedule::default();
        Self {
            step_interval_ms: schedule.interval.as_millis() as u64,
            min_step: schedule.min_step,
            max_step: schedule.max_step,
            seed: None,
            auto_start: true,
            duplicate_policy: DuplicatePolicy::default(),
            stall_timeout_ms: 30_000,
        }
    }
}

impl UploadConfig {
    /// Load from `path` (tilde-expanded) or the platform config dir.
    ///
    /// A missing file yields the defaults; a present but invalid one is an error.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.step_interval_ms > 0, "step_interval_ms must be positive");
        ensure!(self.min_step >= 1, "min_step must be at least 1");
        ensure!(
            self.min_step <= self.max_step,
            "min_step ({}) must not exceed max_step ({})",
            self.min_step,
            self.max_step
        );
        ensure!(self.max_step <= 100, "max_step must be at most 100");
        ensure!(self.stall_timeout_ms > 0, "stall_timeout_ms must be positive");
        Ok(())
    }

    /// `<config dir>/upload-session/config.toml`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "upload-session").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn schedule(&self) -> StepSchedule {
        StepSchedule {
            interval: Duration::from_millis(self.step_interval_ms),
            min_step: self.min_step,
            max_step: self.max_step,
        }
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// JSON Schema of the config file, for editors and docs.
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(UploadConfig);
        serde_json::to_string_pretty(&schema).context("Failed to serialize config schema")
    }
}
