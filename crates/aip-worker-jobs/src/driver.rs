// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sequencing of terraform phases for a single job.
//!
//! | Action | Phases | Budget |
//! |--------|--------|--------|
//! | `plan` | `init`, `plan` | one plan budget shared by both |
//! | `apply` | `init`, `apply` | plan budget for `init`, then a fresh apply budget |
//!
//! The first failing phase aborts the job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, instrument};

use aip_worker_config::ProvisionerConfig;

use crate::credentials::ScopedCredentials;
use crate::envelope::{Action, JobEnvelope};
use crate::error::{JobError, Result};
use crate::provisioner::{Phase, PhaseInvocation, PhaseOutput, Provisioner};
use crate::templates::TemplateCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
	pub plan: Duration,
	pub apply: Duration,
	pub output: Duration,
}

impl PhaseTimeouts {
	pub fn from_config(config: &ProvisionerConfig) -> Self {
		Self {
			plan: Duration::from_secs(config.plan_timeout_secs),
			apply: Duration::from_secs(config.apply_timeout_secs),
			output: Duration::from_secs(config.output_timeout_secs),
		}
	}
}

impl Default for PhaseTimeouts {
	fn default() -> Self {
		Self::from_config(&ProvisionerConfig::default())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSummary {
	pub module_dir: PathBuf,
	/// Phases that completed, in order.
	pub phases: Vec<Phase>,
}

/// Render job inputs as terraform `-var` pairs.
///
/// JSON strings are passed verbatim; every other value is passed as its
/// compact JSON text, which terraform parses for number, bool, list and map
/// variables.
pub fn var_args(inputs: &BTreeMap<String, Value>) -> Vec<String> {
	let mut args = Vec::with_capacity(inputs.len() * 2);
	for (name, value) in inputs {
		let rendered = match value {
			Value::String(s) => s.clone(),
			other => other.to_string(),
		};
		args.push("-var".to_string());
		args.push(format!("{name}={rendered}"));
	}
	args
}

/// Full argument list for a phase, starting with the subcommand.
pub fn phase_args(phase: Phase, inputs: &BTreeMap<String, Value>) -> Vec<String> {
	let mut args: Vec<String> = match phase {
		Phase::Init => vec!["init", "-input=false", "-no-color"],
		Phase::Plan => vec!["plan", "-input=false", "-no-color"],
		Phase::Apply => vec!["apply", "-input=false", "-auto-approve", "-no-color"],
		Phase::Output => vec!["output", "-json"],
	}
	.into_iter()
	.map(String::from)
	.collect();

	if matches!(phase, Phase::Plan | Phase::Apply) {
		args.extend(var_args(inputs));
	}
	args
}

pub struct ProvisioningDriver {
	catalog: TemplateCatalog,
	provisioner: Arc<dyn Provisioner>,
	timeouts: PhaseTimeouts,
}

impl ProvisioningDriver {
	pub fn new(
		catalog: TemplateCatalog,
		provisioner: Arc<dyn Provisioner>,
		timeouts: PhaseTimeouts,
	) -> Self {
		tracing::debug!(
			templates = ?catalog.keys().collect::<Vec<_>>(),
			"template allow-list loaded"
		);
		Self {
			catalog,
			provisioner,
			timeouts,
		}
	}

	/// Module directory for the job's template, if it is allow-listed.
	pub fn resolve(&self, job: &JobEnvelope) -> Result<PathBuf> {
		self.catalog.resolve(&job.template_key)
	}

	#[instrument(
		skip_all,
		fields(run_id = job.run_id, action = %job.action, template = %job.template_key)
	)]
	pub async fn execute(
		&self,
		job: &JobEnvelope,
		module_dir: &Path,
		credentials: &ScopedCredentials,
	) -> Result<PhaseSummary> {
		info!(
			module_dir = %module_dir.display(),
			region = credentials.region(),
			"running terraform {} as assumed role",
			job.action
		);

		let mut phases = Vec::new();
		match &job.action {
			Action::Plan => {
				let deadline = Instant::now() + self.timeouts.plan;
				self.run_phase(job, module_dir, credentials, Phase::Init, deadline)
					.await?;
				phases.push(Phase::Init);
				self.run_phase(job, module_dir, credentials, Phase::Plan, deadline)
					.await?;
				phases.push(Phase::Plan);
			}
			Action::Apply => {
				let deadline = Instant::now() + self.timeouts.plan;
				self.run_phase(job, module_dir, credentials, Phase::Init, deadline)
					.await?;
				phases.push(Phase::Init);
				let deadline = Instant::now() + self.timeouts.apply;
				self.run_phase(job, module_dir, credentials, Phase::Apply, deadline)
					.await?;
				phases.push(Phase::Apply);
			}
			Action::Other(_) => {}
		}

		Ok(PhaseSummary {
			module_dir: module_dir.to_path_buf(),
			phases,
		})
	}

	async fn run_phase(
		&self,
		job: &JobEnvelope,
		module_dir: &Path,
		credentials: &ScopedCredentials,
		phase: Phase,
		deadline: Instant,
	) -> Result<PhaseOutput> {
		let invocation = PhaseInvocation {
			run_id: job.run_id,
			phase,
			module_dir,
			args: phase_args(phase, &job.inputs),
			credentials,
			deadline,
		};
		self.provisioner
			.run_phase(invocation)
			.await
			.map_err(|source| JobError::Phase { phase, source })
	}
}
