// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The per-worker consume loop.
//!
//! Each iteration pops one payload, runs it to a terminal run state and only
//! then pops again. Cancellation is checked between jobs.

use tracing::{error, info, instrument, warn};

use crate::context::{CancellationToken, WorkerDeps};
use crate::envelope::{Action, JobEnvelope};
use crate::error::{JobError, Result};
use crate::queue::QueueError;
use crate::tracker::RunStart;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
	Succeeded { run_id: i64, outputs_recorded: bool },
	Failed { run_id: i64, summary: String },
	/// The run was already terminal; nothing was executed.
	Skipped { run_id: i64 },
}

impl JobOutcome {
	pub fn run_id(&self) -> i64 {
		match self {
			JobOutcome::Succeeded { run_id, .. }
			| JobOutcome::Failed { run_id, .. }
			| JobOutcome::Skipped { run_id } => *run_id,
		}
	}

	pub fn is_success(&self) -> bool {
		matches!(self, JobOutcome::Succeeded { .. })
	}
}

pub struct JobConsumer {
	worker_id: usize,
	deps: WorkerDeps,
}

impl JobConsumer {
	pub fn new(worker_id: usize, deps: WorkerDeps) -> Self {
		Self { worker_id, deps }
	}

	/// Consume until `cancel` fires. A job in progress always finishes.
	pub async fn run(&self, cancel: CancellationToken) {
		info!(worker_id = self.worker_id, "consumer started");
		while !cancel.is_cancelled() {
			if let Err(err) = self.run_once().await {
				warn!(worker_id = self.worker_id, error = %err, "queue pop failed, backing off");
				tokio::time::sleep(self.deps.error_backoff).await;
			}
		}
		info!(worker_id = self.worker_id, "consumer stopped");
	}

	/// Pop at most one payload and process it. `Ok(None)` when the wait
	/// elapsed or the payload was discarded.
	pub async fn run_once(&self) -> std::result::Result<Option<JobOutcome>, QueueError> {
		let Some(payload) = self.deps.queue.pop(self.deps.pop_timeout).await? else {
			return Ok(None);
		};
		Ok(self.process_payload(&payload).await)
	}

	/// Decode and execute one payload. Malformed payloads are logged and
	/// dropped without touching any run.
	pub async fn process_payload(&self, payload: &str) -> Option<JobOutcome> {
		match JobEnvelope::decode(payload) {
			Ok(job) => Some(self.process(job).await),
			Err(err) => {
				warn!(
					worker_id = self.worker_id,
					error = %err,
					payload_len = payload.len(),
					"discarding job payload"
				);
				None
			}
		}
	}

	#[instrument(
		skip_all,
		fields(
			worker_id = self.worker_id,
			run_id = job.run_id,
			action = %job.action,
			template = %job.template_key
		)
	)]
	async fn process(&self, job: JobEnvelope) -> JobOutcome {
		info!(version = %job.template_version, "job received");
		let run_id = job.run_id;
		let tracker = &self.deps.tracker;

		if tracker.mark_running(run_id).await == RunStart::AlreadyFinished {
			warn!("run already finished, job skipped");
			return JobOutcome::Skipped { run_id };
		}

		match self.handle(&job).await {
			Ok(outputs_recorded) => {
				info!(outputs_recorded, "job completed successfully");
				tracker.mark_succeeded(run_id).await;
				JobOutcome::Succeeded {
					run_id,
					outputs_recorded,
				}
			}
			Err(err) if !err.fails_run() => {
				warn!(error = %err, "job completed, deployment outputs left unchanged");
				tracker.mark_succeeded(run_id).await;
				JobOutcome::Succeeded {
					run_id,
					outputs_recorded: false,
				}
			}
			Err(err) => {
				let summary = err.to_string();
				error!(error = %summary, "job failed");
				tracker.mark_failed(run_id, &summary).await;
				JobOutcome::Failed { run_id, summary }
			}
		}
	}

	/// Returns whether deployment outputs were recorded.
	async fn handle(&self, job: &JobEnvelope) -> Result<bool> {
		if let Action::Other(action) = &job.action {
			warn!(action = %action, "unsupported action, skipping");
			return Ok(false);
		}

		let module_dir = self.deps.driver.resolve(job)?;
		let credentials = self
			.deps
			.credentials
			.acquire(job.run_id, &job.role)
			.await?;

		self.deps
			.driver
			.execute(job, &module_dir, &credentials)
			.await?;

		if job.action != Action::Apply {
			return Ok(false);
		}

		let outputs = self
			.deps
			.outputs
			.capture(job, &module_dir, &credentials)
			.await
			.map_err(JobError::OutputCapture)?;
		Ok(self.deps.tracker.record_outputs(job.run_id, &outputs).await)
	}
}
