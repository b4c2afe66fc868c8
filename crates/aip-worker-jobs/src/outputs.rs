// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::credentials::ScopedCredentials;
use crate::driver::phase_args;
use crate::envelope::JobEnvelope;
use crate::provisioner::{Phase, PhaseError, PhaseInvocation, Provisioner};

#[derive(Debug, thiserror::Error)]
pub enum OutputCaptureError {
	#[error("terraform output failed: {0}")]
	Phase(#[from] PhaseError),

	#[error("terraform output returned invalid JSON: {0}")]
	Parse(#[from] serde_json::Error),
}

/// Reads `terraform output -json` after a successful apply. The result is
/// stored as an opaque document; no schema is imposed.
pub struct OutputCapturer {
	provisioner: Arc<dyn Provisioner>,
	timeout: Duration,
}

impl OutputCapturer {
	pub fn new(provisioner: Arc<dyn Provisioner>, timeout: Duration) -> Self {
		Self {
			provisioner,
			timeout,
		}
	}

	#[tracing::instrument(skip_all, fields(run_id = job.run_id))]
	pub async fn capture(
		&self,
		job: &JobEnvelope,
		module_dir: &Path,
		credentials: &ScopedCredentials,
	) -> Result<Value, OutputCaptureError> {
		let output = self
			.provisioner
			.run_phase(PhaseInvocation {
				run_id: job.run_id,
				phase: Phase::Output,
				module_dir,
				args: phase_args(Phase::Output, &job.inputs),
				credentials,
				deadline: Instant::now() + self.timeout,
			})
			.await?;

		let outputs: Value = serde_json::from_slice(&output.stdout)?;
		tracing::debug!(bytes = output.stdout.len(), "captured terraform outputs");
		Ok(outputs)
	}
}
