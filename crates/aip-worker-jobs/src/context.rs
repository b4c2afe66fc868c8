// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aip_worker_config::WorkerConfig;
use aip_worker_db::RunStore;

use crate::credentials::CredentialBroker;
use crate::driver::{PhaseTimeouts, ProvisioningDriver};
use crate::outputs::OutputCapturer;
use crate::provisioner::Provisioner;
use crate::queue::JobQueue;
use crate::templates::TemplateCatalog;
use crate::tracker::RunStateTracker;

#[derive(Clone)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self {
			cancelled: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}

impl Default for CancellationToken {
	fn default() -> Self {
		Self::new()
	}
}

/// Everything a consumer needs, built once at startup and shared by every
/// worker in the pool.
#[derive(Clone)]
pub struct WorkerDeps {
	pub queue: Arc<dyn JobQueue>,
	pub credentials: Arc<dyn CredentialBroker>,
	pub driver: Arc<ProvisioningDriver>,
	pub outputs: Arc<OutputCapturer>,
	pub tracker: Arc<RunStateTracker>,
	pub pop_timeout: Duration,
	pub error_backoff: Duration,
}

impl WorkerDeps {
	pub fn new(
		config: &WorkerConfig,
		queue: Arc<dyn JobQueue>,
		credentials: Arc<dyn CredentialBroker>,
		provisioner: Arc<dyn Provisioner>,
		store: Arc<dyn RunStore>,
	) -> Self {
		let timeouts = PhaseTimeouts::from_config(&config.provisioner);
		let catalog = TemplateCatalog::from_config(&config.provisioner);

		Self {
			queue,
			credentials,
			driver: Arc::new(ProvisioningDriver::new(
				catalog,
				provisioner.clone(),
				timeouts,
			)),
			outputs: Arc::new(OutputCapturer::new(provisioner, timeouts.output)),
			tracker: Arc::new(RunStateTracker::new(
				store,
				Duration::from_secs(config.worker.store_timeout_secs),
			)),
			pop_timeout: Duration::from_secs(config.queue.pop_timeout_secs),
			error_backoff: Duration::from_millis(config.queue.error_backoff_ms),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cancellation_token_shared_between_clones() {
		let token = CancellationToken::new();
		let clone = token.clone();
		assert!(!clone.is_cancelled());
		token.cancel();
		assert!(clone.is_cancelled());
	}
}
