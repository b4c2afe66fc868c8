// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provisioning tool configuration section.
//!
//! `templates` is the allow-list of template keys the worker will execute,
//! mapped to module directories. Relative directories are resolved against
//! `modules_root`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_binary() -> String {
	"terraform".to_string()
}

fn default_modules_root() -> PathBuf {
	PathBuf::from("../../infra/modules")
}

fn default_templates() -> BTreeMap<String, PathBuf> {
	BTreeMap::from([("ecs-service".to_string(), PathBuf::from("ecs-service"))])
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProvisionerConfigLayer {
	pub binary: Option<String>,
	pub modules_root: Option<PathBuf>,
	pub templates: Option<BTreeMap<String, PathBuf>>,
	pub plan_timeout_secs: Option<u64>,
	pub apply_timeout_secs: Option<u64>,
	pub output_timeout_secs: Option<u64>,
}

impl ProvisionerConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.binary.is_some() {
			self.binary = other.binary;
		}
		if other.modules_root.is_some() {
			self.modules_root = other.modules_root;
		}
		if other.templates.is_some() {
			self.templates = other.templates;
		}
		if other.plan_timeout_secs.is_some() {
			self.plan_timeout_secs = other.plan_timeout_secs;
		}
		if other.apply_timeout_secs.is_some() {
			self.apply_timeout_secs = other.apply_timeout_secs;
		}
		if other.output_timeout_secs.is_some() {
			self.output_timeout_secs = other.output_timeout_secs;
		}
	}

	pub fn finalize(self) -> ProvisionerConfig {
		ProvisionerConfig {
			binary: self.binary.unwrap_or_else(default_binary),
			modules_root: self.modules_root.unwrap_or_else(default_modules_root),
			templates: self.templates.unwrap_or_else(default_templates),
			plan_timeout_secs: self.plan_timeout_secs.unwrap_or(300),
			apply_timeout_secs: self.apply_timeout_secs.unwrap_or(600),
			output_timeout_secs: self.output_timeout_secs.unwrap_or(120),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionerConfig {
	pub binary: String,
	pub modules_root: PathBuf,
	pub templates: BTreeMap<String, PathBuf>,
	/// Budget shared by `init` and `plan` for a plan job.
	pub plan_timeout_secs: u64,
	pub apply_timeout_secs: u64,
	pub output_timeout_secs: u64,
}

impl Default for ProvisionerConfig {
	fn default() -> Self {
		ProvisionerConfigLayer::default().finalize()
	}
}

/// Parse `key=dir,key=dir` as used by `AIP_WORKER_TEMPLATES`.
pub fn parse_template_list(
	key: &str,
	value: &str,
) -> Result<BTreeMap<String, PathBuf>, ConfigError> {
	let mut templates = BTreeMap::new();
	for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
		let (name, dir) = entry
			.split_once('=')
			.map(|(n, d)| (n.trim(), d.trim()))
			.filter(|(n, d)| !n.is_empty() && !d.is_empty())
			.ok_or_else(|| ConfigError::InvalidValue {
				key: key.to_string(),
				message: format!("expected key=dir, got '{entry}'"),
			})?;
		templates.insert(name.to_string(), PathBuf::from(dir));
	}
	Ok(templates)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = ProvisionerConfig::default();
		assert_eq!(config.binary, "terraform");
		assert_eq!(config.modules_root, PathBuf::from("../../infra/modules"));
		assert_eq!(config.templates.len(), 1);
		assert_eq!(
			config.templates.get("ecs-service"),
			Some(&PathBuf::from("ecs-service"))
		);
		assert_eq!(config.plan_timeout_secs, 300);
		assert_eq!(config.apply_timeout_secs, 600);
		assert_eq!(config.output_timeout_secs, 120);
	}

	#[test]
	fn test_merge_replaces_template_map() {
		let mut base = ProvisionerConfigLayer {
			templates: Some(default_templates()),
			..Default::default()
		};
		base.merge(ProvisionerConfigLayer {
			templates: Some(BTreeMap::from([(
				"rds-postgres".to_string(),
				PathBuf::from("/opt/modules/rds"),
			)])),
			..Default::default()
		});
		let templates = base.templates.unwrap();
		assert_eq!(templates.len(), 1);
		assert!(templates.contains_key("rds-postgres"));
	}

	#[test]
	fn test_parse_template_list() {
		let templates =
			parse_template_list("AIP_WORKER_TEMPLATES", "ecs-service=ecs-service, rds = db/rds").unwrap();
		assert_eq!(templates.len(), 2);
		assert_eq!(templates.get("rds"), Some(&PathBuf::from("db/rds")));
	}

	#[test]
	fn test_parse_template_list_rejects_missing_dir() {
		let result = parse_template_list("AIP_WORKER_TEMPLATES", "ecs-service");
		assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
	}

	#[test]
	fn test_deserialize_templates_table() {
		let toml_str = r#"
binary = "/usr/local/bin/terraform"

[templates]
ecs-service = "ecs-service"
static-site = "/srv/modules/static-site"
"#;
		let layer: ProvisionerConfigLayer = toml::from_str(toml_str).unwrap();
		assert_eq!(layer.binary.as_deref(), Some("/usr/local/bin/terraform"));
		assert_eq!(layer.templates.unwrap().len(), 2);
	}
}
