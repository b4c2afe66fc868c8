// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Best-effort run lifecycle writes.
//!
//! Every write is bounded by a timeout. A failed or slow write is logged and
//! dropped; it never changes the outcome of the job that triggered it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use aip_worker_db::{DbError, RunStore};

use crate::error::JobError;

/// How a `mark_running` call left the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStart {
	Started,
	/// The run already reached a terminal status and was left untouched.
	AlreadyFinished,
	/// The write failed or timed out. The job proceeds regardless.
	Unrecorded,
}

enum WriteFailure {
	Finished,
	Dropped,
}

pub struct RunStateTracker {
	store: Arc<dyn RunStore>,
	timeout: Duration,
}

impl RunStateTracker {
	pub fn new(store: Arc<dyn RunStore>, timeout: Duration) -> Self {
		Self { store, timeout }
	}

	pub async fn mark_running(&self, run_id: i64) -> RunStart {
		match self
			.bounded("mark_running", run_id, self.store.mark_running(run_id))
			.await
		{
			Ok(()) => RunStart::Started,
			Err(WriteFailure::Finished) => RunStart::AlreadyFinished,
			Err(WriteFailure::Dropped) => RunStart::Unrecorded,
		}
	}

	/// Returns whether the write landed.
	pub async fn mark_succeeded(&self, run_id: i64) -> bool {
		self.bounded("mark_succeeded", run_id, self.store.mark_succeeded(run_id))
			.await
			.is_ok()
	}

	pub async fn mark_failed(&self, run_id: i64, summary: &str) -> bool {
		self.bounded("mark_failed", run_id, self.store.mark_failed(run_id, summary))
			.await
			.is_ok()
	}

	/// Overwrite the owning deployment's outputs.
	pub async fn record_outputs(&self, run_id: i64, outputs: &Value) -> bool {
		self.bounded(
			"record_outputs",
			run_id,
			self.store.update_deployment_outputs(run_id, outputs),
		)
		.await
		.is_ok()
	}

	async fn bounded<T>(
		&self,
		operation: &'static str,
		run_id: i64,
		write: impl Future<Output = aip_worker_db::Result<T>>,
	) -> Result<T, WriteFailure> {
		match tokio::time::timeout(self.timeout, write).await {
			Ok(Ok(value)) => Ok(value),
			Ok(Err(DbError::RunFinished(_))) => {
				warn!(run_id, operation, "run already finished, state left unchanged");
				Err(WriteFailure::Finished)
			}
			Ok(Err(err)) => {
				let err = JobError::Persistence(err);
				warn!(run_id, operation, error = %err, "run state update failed");
				Err(WriteFailure::Dropped)
			}
			Err(_) => {
				warn!(
					run_id,
					operation,
					timeout_ms = self.timeout.as_millis() as u64,
					"run state update timed out"
				);
				Err(WriteFailure::Dropped)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use aip_worker_db::testing::{create_run_test_pool, insert_deployment, insert_run};
	use aip_worker_db::{Deployment, Run, RunRepository, RunStatus};
	use async_trait::async_trait;
	use serde_json::json;

	async fn setup() -> (Arc<RunRepository>, RunStateTracker) {
		let pool = create_run_test_pool().await;
		insert_deployment(&pool, 1, Some(r#"{"old":true}"#)).await;
		insert_run(&pool, 10, 1, "apply").await;
		let repo = Arc::new(RunRepository::new(pool));
		let tracker = RunStateTracker::new(repo.clone(), Duration::from_secs(5));
		(repo, tracker)
	}

	#[tokio::test]
	async fn test_lifecycle_writes() {
		let (repo, tracker) = setup().await;

		assert_eq!(tracker.mark_running(10).await, RunStart::Started);
		assert_eq!(
			repo.get_run(10).await.unwrap().unwrap().status,
			RunStatus::Running
		);

		assert!(tracker.mark_succeeded(10).await);
		let run = repo.get_run(10).await.unwrap().unwrap();
		assert_eq!(run.status, RunStatus::Succeeded);
		assert!(run.finished_at.is_some());
	}

	#[tokio::test]
	async fn test_record_outputs() {
		let (repo, tracker) = setup().await;
		let outputs = json!({"service_url": {"value": "https://api.example.com"}});

		assert!(tracker.record_outputs(10, &outputs).await);
		let deployment = repo.get_deployment(1).await.unwrap().unwrap();
		assert_eq!(deployment.outputs_json, Some(outputs));
	}

	#[tokio::test]
	async fn test_missing_run_is_logged_not_raised() {
		let (_repo, tracker) = setup().await;
		assert_eq!(tracker.mark_running(999).await, RunStart::Unrecorded);
		assert!(!tracker.mark_failed(999, "boom").await);
		assert!(!tracker.record_outputs(999, &json!({})).await);
	}

	#[tokio::test]
	async fn test_finished_run_is_reported() {
		let (repo, tracker) = setup().await;
		assert!(tracker.mark_failed(10, "terraform init failed").await);

		assert_eq!(tracker.mark_running(10).await, RunStart::AlreadyFinished);
		assert!(!tracker.mark_succeeded(10).await);
		assert_eq!(
			repo.get_run(10).await.unwrap().unwrap().status,
			RunStatus::Failed
		);
	}

	struct StalledStore;

	#[async_trait]
	impl RunStore for StalledStore {
		async fn mark_running(&self, _run_id: i64) -> aip_worker_db::Result<()> {
			tokio::time::sleep(Duration::from_secs(60)).await;
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
			_outputs: &Value,
		) -> aip_worker_db::Result<i64> {
			Ok(1)
		}
		async fn get_run(&self, _run_id: i64) -> aip_worker_db::Result<Option<Run>> {
			Ok(None)
		}
		async fn get_deployment(
			&self,
			_deployment_id: i64,
		) -> aip_worker_db::Result<Option<Deployment>> {
			Ok(None)
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_slow_store_times_out() {
		let tracker = RunStateTracker::new(Arc::new(StalledStore), Duration::from_secs(5));
		let started = tokio::time::Instant::now();

		assert_eq!(tracker.mark_running(1).await, RunStart::Unrecorded);
		assert_eq!(started.elapsed(), Duration::from_secs(5));
		assert!(tracker.mark_succeeded(1).await);
	}
}
