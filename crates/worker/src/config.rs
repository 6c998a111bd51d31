//! Pipeline configuration loaded from TOML.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The document is not valid TOML or has unknown keys.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value parsed but is outside its allowed range.
	#[error("invalid configuration: {0}")]
	Invalid(String),
}

/// Top-level configuration for the offload pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OffloadConfig {
	/// Long-task observation settings.
	pub monitor: MonitorConfig,
	/// Background context settings.
	pub worker: WorkerConfig,
}

impl OffloadConfig {
	/// Parses and validates a TOML document. Missing keys take defaults.
	pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(source)?;
		config.validate()?;
		Ok(config)
	}

	/// Checks value ranges that serde cannot express.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.monitor.threshold_ms == 0 {
			return Err(ConfigError::Invalid("monitor.threshold_ms must be > 0".into()));
		}
		if self.monitor.flush_interval_ms == 0 {
			return Err(ConfigError::Invalid("monitor.flush_interval_ms must be > 0".into()));
		}
		if self.worker.thread_name.trim().is_empty() {
			return Err(ConfigError::Invalid("worker.thread_name cannot be empty".into()));
		}
		if self.worker.resource_scheme.trim().is_empty() {
			return Err(ConfigError::Invalid("worker.resource_scheme cannot be empty".into()));
		}
		Ok(())
	}
}

/// Long-task observation settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
	/// Tasks longer than this many milliseconds count as long tasks.
	pub threshold_ms: u64,
	/// How often buffered samples are delivered as a batch.
	pub flush_interval_ms: u64,
}

impl MonitorConfig {
	pub fn threshold(&self) -> Duration {
		Duration::from_millis(self.threshold_ms)
	}

	pub fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms)
	}
}

impl Default for MonitorConfig {
	fn default() -> Self {
		Self {
			threshold_ms: 50,
			flush_interval_ms: 100,
		}
	}
}

/// Background context settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
	/// Prefix for context thread names.
	pub thread_name: String,
	/// When false the host refuses to create contexts.
	pub allow_spawn: bool,
	/// Scheme used for in-memory script resource addresses.
	pub resource_scheme: String,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			thread_name: "offpaint-render".to_string(),
			allow_spawn: true,
			resource_scheme: "blob".to_string(),
		}
	}
}
