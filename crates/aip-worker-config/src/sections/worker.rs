// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Worker pool configuration section.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfigLayer {
	pub concurrency: Option<usize>,
	pub store_timeout_secs: Option<u64>,
}

impl WorkerPoolConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.concurrency.is_some() {
			self.concurrency = other.concurrency;
		}
		if other.store_timeout_secs.is_some() {
			self.store_timeout_secs = other.store_timeout_secs;
		}
	}

	pub fn finalize(self) -> WorkerPoolConfig {
		WorkerPoolConfig {
			concurrency: self.concurrency.unwrap_or(1),
			store_timeout_secs: self.store_timeout_secs.unwrap_or(5),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
	/// Number of independent consumers pulling from the queue.
	pub concurrency: usize,
	/// Upper bound on each run-state write.
	pub store_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
	fn default() -> Self {
		Self {
			concurrency: 1,
			store_timeout_secs: 5,
		}
	}
}
