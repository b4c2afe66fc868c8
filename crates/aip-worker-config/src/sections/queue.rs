// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job queue configuration section.

use serde::{Deserialize, Serialize};

fn default_redis_url() -> String {
	"redis://127.0.0.1:6379".to_string()
}

fn default_key() -> String {
	"aip:jobs".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueConfigLayer {
	pub redis_url: Option<String>,
	pub key: Option<String>,
	pub pop_timeout_secs: Option<u64>,
	pub error_backoff_ms: Option<u64>,
}

impl QueueConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.redis_url.is_some() {
			self.redis_url = other.redis_url;
		}
		if other.key.is_some() {
			self.key = other.key;
		}
		if other.pop_timeout_secs.is_some() {
			self.pop_timeout_secs = other.pop_timeout_secs;
		}
		if other.error_backoff_ms.is_some() {
			self.error_backoff_ms = other.error_backoff_ms;
		}
	}

	pub fn finalize(self) -> QueueConfig {
		QueueConfig {
			redis_url: self.redis_url.unwrap_or_else(default_redis_url),
			key: self.key.unwrap_or_else(default_key),
			pop_timeout_secs: self.pop_timeout_secs.unwrap_or(5),
			error_backoff_ms: self.error_backoff_ms.unwrap_or(1000),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
	pub redis_url: String,
	/// Name of the Redis list producers `RPUSH` onto.
	pub key: String,
	/// How long a single blocking pop waits before looping.
	pub pop_timeout_secs: u64,
	/// Pause after a queue error before the next pop.
	pub error_backoff_ms: u64,
}

impl QueueConfig {
	/// The Redis URL with any password replaced, for logs and `check-config`.
	pub fn redacted_redis_url(&self) -> String {
		let Some((scheme, rest)) = self.redis_url.split_once("://") else {
			return self.redis_url.clone();
		};
		match rest.rsplit_once('@') {
			Some((userinfo, host)) => {
				let user = userinfo.split_once(':').map_or(userinfo, |(u, _)| u);
				format!("{scheme}://{user}:[REDACTED]@{host}")
			}
			None => self.redis_url.clone(),
		}
	}
}

impl Default for QueueConfig {
	fn default() -> Self {
		QueueConfigLayer::default().finalize()
	}
}
