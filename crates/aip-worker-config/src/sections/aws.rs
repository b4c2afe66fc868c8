// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AWS role-assumption configuration section.

use serde::{Deserialize, Serialize};

/// Shortest session STS will issue.
pub const MIN_SESSION_DURATION_SECS: i32 = 900;
/// Longest session STS will issue for a role with the maximum setting.
pub const MAX_SESSION_DURATION_SECS: i32 = 43_200;

fn default_region() -> String {
	"ap-northeast-1".to_string()
}

fn default_session_name_prefix() -> String {
	"aip-run".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AwsConfigLayer {
	pub default_region: Option<String>,
	pub session_duration_secs: Option<i32>,
	pub session_name_prefix: Option<String>,
}

impl AwsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.default_region.is_some() {
			self.default_region = other.default_region;
		}
		if other.session_duration_secs.is_some() {
			self.session_duration_secs = other.session_duration_secs;
		}
		if other.session_name_prefix.is_some() {
			self.session_name_prefix = other.session_name_prefix;
		}
	}

	pub fn finalize(self) -> AwsConfig {
		AwsConfig {
			default_region: self.default_region.unwrap_or_else(default_region),
			session_duration_secs: self.session_duration_secs.unwrap_or(3600),
			session_name_prefix: self
				.session_name_prefix
				.unwrap_or_else(default_session_name_prefix),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AwsConfig {
	/// Region used when a job's role descriptor carries none.
	pub default_region: String,
	pub session_duration_secs: i32,
	/// Role session names are `<prefix>-<run_id>`.
	pub session_name_prefix: String,
}

impl Default for AwsConfig {
	fn default() -> Self {
		AwsConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = AwsConfig::default();
		assert_eq!(config.default_region, "ap-northeast-1");
		assert_eq!(config.session_duration_secs, 3600);
		assert_eq!(config.session_name_prefix, "aip-run");
	}

	#[test]
	fn test_deserialize_layer_partial() {
		let layer: AwsConfigLayer = toml::from_str(r#"default_region = "us-east-1""#).unwrap();
		assert_eq!(layer.default_region.as_deref(), Some("us-east-1"));
		assert!(layer.session_duration_secs.is_none());
	}
}
