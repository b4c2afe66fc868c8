// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration management for the aip provisioning worker.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`AIP_WORKER_*`)
//!
//! # Usage
//!
//! ```ignore
//! use aip_worker_config::load_config;
//!
//! let config = load_config()?;
//! println!("Consuming {} with {} workers", config.queue.key, config.worker.concurrency);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::WorkerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved worker configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerConfig {
	pub database: DatabaseConfig,
	pub queue: QueueConfig,
	pub worker: WorkerPoolConfig,
	pub provisioner: ProvisionerConfig,
	pub aws: AwsConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`AIP_WORKER_*`)
/// 2. Config file (`/etc/aip/worker.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<WorkerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<WorkerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<WorkerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = WorkerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: WorkerConfigLayer) -> Result<WorkerConfig, ConfigError> {
	let config = WorkerConfig {
		database: layer.database.unwrap_or_default().finalize(),
		queue: layer.queue.unwrap_or_default().finalize(),
		worker: layer.worker.unwrap_or_default().finalize(),
		provisioner: layer.provisioner.unwrap_or_default().finalize(),
		aws: layer.aws.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		database = %config.database.url,
		redis = %config.queue.redacted_redis_url(),
		queue_key = %config.queue.key,
		concurrency = config.worker.concurrency,
		templates = config.provisioner.templates.len(),
		default_region = %config.aws.default_region,
		"Worker configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &WorkerConfig) -> Result<(), ConfigError> {
	if config.worker.concurrency < 1 {
		return Err(ConfigError::Validation(
			"worker.concurrency must be at least 1".to_string(),
		));
	}

	let timeouts = [
		("queue.pop_timeout_secs", config.queue.pop_timeout_secs),
		("worker.store_timeout_secs", config.worker.store_timeout_secs),
		("provisioner.plan_timeout_secs", config.provisioner.plan_timeout_secs),
		("provisioner.apply_timeout_secs", config.provisioner.apply_timeout_secs),
		("provisioner.output_timeout_secs", config.provisioner.output_timeout_secs),
	];
	for (name, value) in timeouts {
		if value == 0 {
			return Err(ConfigError::Validation(format!(
				"{name} must be greater than zero"
			)));
		}
	}

	let duration = config.aws.session_duration_secs;
	if !(MIN_SESSION_DURATION_SECS..=MAX_SESSION_DURATION_SECS).contains(&duration) {
		return Err(ConfigError::Validation(format!(
			"aws.session_duration_secs must be between {MIN_SESSION_DURATION_SECS} and \
			 {MAX_SESSION_DURATION_SECS}, got {duration}"
		)));
	}

	if config.provisioner.templates.is_empty() {
		return Err(ConfigError::Validation(
			"provisioner.templates must allow at least one template".to_string(),
		));
	}

	Ok(())
}
