// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use aip_worker_db::DbError;

use crate::credentials::CredentialError;
use crate::outputs::OutputCaptureError;
use crate::provisioner::{Phase, PhaseError};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("invalid job payload: {0}")]
	Decode(#[from] serde_json::Error),

	#[error("assume role failed: {0}")]
	Credential(#[from] CredentialError),

	#[error("unsupported blueprint {0:?}")]
	UnsupportedTemplate(String),

	#[error("terraform {phase} failed: {source}")]
	Phase {
		phase: Phase,
		#[source]
		source: PhaseError,
	},

	#[error(transparent)]
	OutputCapture(#[from] OutputCaptureError),

	#[error("persistence error: {0}")]
	Persistence(#[from] DbError),
}

impl JobError {
	/// Whether this error marks the run `failed`.
	///
	/// Decode errors never reach a run, output capture is best-effort after a
	/// successful apply, and persistence errors are logged by the tracker.
	pub fn fails_run(&self) -> bool {
		match self {
			JobError::Credential(_) | JobError::UnsupportedTemplate(_) => true,
			JobError::Phase { phase, .. } => *phase != Phase::Output,
			JobError::Decode(_) | JobError::OutputCapture(_) | JobError::Persistence(_) => false,
		}
	}
}

pub type Result<T> = std::result::Result<T, JobError>;
