// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::WorkerConfigLayer;
use crate::sections::{
	parse_template_list, AwsConfigLayer, DatabaseConfigLayer, LogFormat, LoggingConfigLayer,
	ProvisionerConfigLayer, QueueConfigLayer, WorkerPoolConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<WorkerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<WorkerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(WorkerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/aip/worker.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<WorkerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(WorkerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: WorkerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: AIP_WORKER_<FIELD>. `REDIS_ADDR` (host:port) is honoured when
/// `AIP_WORKER_REDIS_URL` is unset.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<WorkerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(WorkerConfigLayer {
			database: Some(load_database_from_env()),
			queue: Some(load_queue_from_env()?),
			worker: Some(load_worker_from_env()?),
			provisioner: Some(load_provisioner_from_env()?),
			aws: Some(load_aws_from_env()?),
			logging: Some(load_logging_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_i32(name: &str) -> Result<Option<i32>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid i32 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid usize value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("AIP_WORKER_DATABASE_URL"),
	}
}

fn load_queue_from_env() -> Result<QueueConfigLayer, ConfigError> {
	let redis_url = env_var("AIP_WORKER_REDIS_URL")
		.or_else(|| env_var("REDIS_ADDR").map(|addr| redis_url_from_addr(&addr)));

	Ok(QueueConfigLayer {
		redis_url,
		key: env_var("AIP_WORKER_QUEUE_KEY"),
		pop_timeout_secs: env_u64("AIP_WORKER_QUEUE_POP_TIMEOUT_SECS")?,
		error_backoff_ms: env_u64("AIP_WORKER_QUEUE_ERROR_BACKOFF_MS")?,
	})
}

fn redis_url_from_addr(addr: &str) -> String {
	if addr.contains("://") {
		addr.to_string()
	} else {
		format!("redis://{addr}")
	}
}

fn load_worker_from_env() -> Result<WorkerPoolConfigLayer, ConfigError> {
	Ok(WorkerPoolConfigLayer {
		concurrency: env_usize("AIP_WORKER_CONCURRENCY")?,
		store_timeout_secs: env_u64("AIP_WORKER_STORE_TIMEOUT_SECS")?,
	})
}

fn load_provisioner_from_env() -> Result<ProvisionerConfigLayer, ConfigError> {
	let templates = env_var("AIP_WORKER_TEMPLATES")
		.map(|v| parse_template_list("AIP_WORKER_TEMPLATES", &v))
		.transpose()?;

	Ok(ProvisionerConfigLayer {
		binary: env_var("AIP_WORKER_TERRAFORM_BIN"),
		modules_root: env_var("AIP_WORKER_MODULES_ROOT").map(PathBuf::from),
		templates,
		plan_timeout_secs: env_u64("AIP_WORKER_PLAN_TIMEOUT_SECS")?,
		apply_timeout_secs: env_u64("AIP_WORKER_APPLY_TIMEOUT_SECS")?,
		output_timeout_secs: env_u64("AIP_WORKER_OUTPUT_TIMEOUT_SECS")?,
	})
}

fn load_aws_from_env() -> Result<AwsConfigLayer, ConfigError> {
	Ok(AwsConfigLayer {
		default_region: env_var("AIP_WORKER_AWS_DEFAULT_REGION"),
		session_duration_secs: env_i32("AIP_WORKER_AWS_SESSION_DURATION_SECS")?,
		session_name_prefix: env_var("AIP_WORKER_AWS_SESSION_NAME_PREFIX"),
	})
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = env_var("AIP_WORKER_LOG_FORMAT")
		.map(|v| {
			v.parse::<LogFormat>()
				.map_err(|message| ConfigError::InvalidValue {
					key: "AIP_WORKER_LOG_FORMAT".to_string(),
					message,
				})
		})
		.transpose()?;

	Ok(LoggingConfigLayer {
		level: env_var("AIP_WORKER_LOG_LEVEL"),
		format,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_defaults_source_returns_empty_layer() {
		let layer = DefaultsSource.load().unwrap();
		assert!(layer.queue.is_none());
		assert!(layer.database.is_none());
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let source = TomlSource::new("/nonexistent/worker.toml");
		let layer = source.load().unwrap();
		assert!(layer.queue.is_none());
	}

	#[test]
	fn test_toml_source_reads_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[worker]\nconcurrency = 4").unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		assert_eq!(layer.worker.unwrap().concurrency, Some(4));
	}

	#[test]
	fn test_toml_source_reports_parse_error() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[worker\nconcurrency = ").unwrap();

		let result = TomlSource::new(file.path()).load();
		assert!(matches!(result, Err(ConfigError::TomlParse { .. })));
	}

	#[test]
	fn test_redis_url_from_addr() {
		assert_eq!(redis_url_from_addr("127.0.0.1:6379"), "redis://127.0.0.1:6379");
		assert_eq!(
			redis_url_from_addr("rediss://cache.internal:6380"),
			"rediss://cache.internal:6380"
		);
	}
}
