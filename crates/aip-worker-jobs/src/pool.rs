// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::consumer::JobConsumer;
use crate::context::{CancellationToken, WorkerDeps};

/// A fixed number of consumers sharing one queue and one set of
/// dependencies.
pub struct WorkerPool {
	deps: WorkerDeps,
	concurrency: usize,
	cancellation_token: CancellationToken,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
	/// `concurrency` below 1 is raised to 1.
	pub fn new(deps: WorkerDeps, concurrency: usize) -> Self {
		Self {
			deps,
			concurrency: concurrency.max(1),
			cancellation_token: CancellationToken::new(),
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn concurrency(&self) -> usize {
		self.concurrency
	}

	#[instrument(skip(self), fields(concurrency = self.concurrency))]
	pub async fn start(&self) {
		let mut handles = self.handles.lock().await;
		if !handles.is_empty() {
			warn!("worker pool already started");
			return;
		}

		for worker_id in 0..self.concurrency {
			let consumer = Arc::new(JobConsumer::new(worker_id, self.deps.clone()));
			let cancel = self.cancellation_token.clone();
			handles.push(tokio::spawn(async move {
				consumer.run(cancel).await;
			}));
		}

		info!(worker_count = handles.len(), "Worker pool started");
	}

	/// Stop popping new jobs and wait for every in-flight job to finish.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.cancellation_token.cancel();

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			if let Err(err) = handle.await {
				warn!(error = %err, "worker task ended abnormally");
			}
		}

		info!("Worker pool shut down");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	use aip_worker_config::WorkerConfig;
	use aip_worker_db::testing::{create_run_test_pool, insert_deployment, insert_run};
	use aip_worker_db::{RunRepository, RunStatus};

	use crate::envelope::Action;
	use crate::queue::JobQueue;
	use crate::testing::{test_job, InMemoryJobQueue, ScriptedProvisioner, StaticCredentialBroker};

	#[tokio::test]
	async fn test_pool_drains_queue_and_shuts_down() {
		let pool = create_run_test_pool().await;
		insert_deployment(&pool, 1, None).await;
		for run_id in 1..=6 {
			insert_run(&pool, run_id, 1, "plan").await;
		}
		let repo = Arc::new(RunRepository::new(pool));

		let mut config = WorkerConfig::default();
		config.queue.pop_timeout_secs = 1;
		let queue = Arc::new(InMemoryJobQueue::new());
		for run_id in 1..=6 {
			queue
				.push(&test_job(run_id, Action::Plan).encode().unwrap())
				.await
				.unwrap();
		}

		let provisioner = Arc::new(ScriptedProvisioner::new());
		let deps = WorkerDeps::new(
			&config,
			queue.clone(),
			Arc::new(StaticCredentialBroker::default()),
			provisioner.clone(),
			repo.clone(),
		);
		let workers = WorkerPool::new(deps, 3);
		assert_eq!(workers.concurrency(), 3);
		workers.start().await;

		for _ in 0..300 {
			if queue.is_empty().await && provisioner.invocations().await.len() == 12 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}

		tokio::time::timeout(Duration::from_secs(5), workers.shutdown())
			.await
			.unwrap();

		for run_id in 1..=6 {
			let run = repo.get_run(run_id).await.unwrap().unwrap();
			assert_eq!(run.status, RunStatus::Succeeded, "run {run_id}");
		}
	}

	#[test]
	fn test_zero_concurrency_clamped() {
		let config = WorkerConfig::default();
		let deps = WorkerDeps::new(
			&config,
			Arc::new(InMemoryJobQueue::new()),
			Arc::new(StaticCredentialBroker::default()),
			Arc::new(ScriptedProvisioner::new()),
			Arc::new(StubStore),
		);
		assert_eq!(WorkerPool::new(deps, 0).concurrency(), 1);
	}

	struct StubStore;

	#[async_trait::async_trait]
	impl aip_worker_db::RunStore for StubStore {
		async fn mark_running(&self, _run_id: i64) -> aip_worker_db::Result<()> {
			Ok(())
		}
		async fn mark_succeeded(&self, _run_id: i64) -> aip_worker_db::Result<()> {
			Ok(())
		}
		async fn mark_failed(&self, _run_id: i64, _summary: &str) -> aip_worker_db::Result<()> {
			Ok(())
		}
		async fn update_deployment_outputs(
			&self,
			_run_id: i64,
			_outputs: &serde_json::Value,
		) -> aip_worker_db::Result<i64> {
			Ok(1)
		}
		async fn get_run(&self, _run_id: i64) -> aip_worker_db::Result<Option<aip_worker_db::Run>> {
			Ok(None)
		}
		async fn get_deployment(
			&self,
			_deployment_id: i64,
		) -> aip_worker_db::Result<Option<aip_worker_db::Deployment>> {
			Ok(None)
		}
	}
}
