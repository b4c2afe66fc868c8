// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One terraform subprocess per phase.
//!
//! The child inherits the worker's environment plus the four job-scoped AWS
//! variables. Credentials never appear on argv or on disk. Streamed phases
//! forward every output line to tracing under [`TOOL_LOG_TARGET`]; the
//! `output` phase collects stdout instead so it can be parsed.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;

use crate::credentials::ScopedCredentials;

pub const TOOL_LOG_TARGET: &str = "aip_worker_jobs::tool";

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
	Init,
	Plan,
	Apply,
	Output,
}

impl Phase {
	pub fn as_str(&self) -> &'static str {
		match self {
			Phase::Init => "init",
			Phase::Plan => "plan",
			Phase::Apply => "apply",
			Phase::Output => "output",
		}
	}

	pub fn captures_stdout(&self) -> bool {
		matches!(self, Phase::Output)
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
	#[error("{}", exit_message(.code, .stderr))]
	Exit { code: Option<i32>, stderr: String },

	#[error("deadline exceeded")]
	Timeout,

	#[error("failed to run terraform: {0}")]
	Io(#[from] std::io::Error),
}

fn exit_message(code: &Option<i32>, stderr: &str) -> String {
	let status = match code {
		Some(code) => format!("exit status {code}"),
		None => "terminated by signal".to_string(),
	};
	if stderr.is_empty() {
		status
	} else {
		format!("{status}: {stderr}")
	}
}

#[derive(Debug)]
pub struct PhaseInvocation<'a> {
	pub run_id: i64,
	pub phase: Phase,
	pub module_dir: &'a Path,
	/// Arguments after `-chdir=<module_dir>`, starting with the subcommand.
	pub args: Vec<String>,
	pub credentials: &'a ScopedCredentials,
	/// The child is killed if it is still running at this instant.
	pub deadline: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOutput {
	/// Raw stdout for phases that capture it, empty otherwise. Decoding is
	/// left to the caller.
	pub stdout: Vec<u8>,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
	async fn run_phase(&self, invocation: PhaseInvocation<'_>) -> Result<PhaseOutput, PhaseError>;
}

pub struct TerraformProvisioner {
	binary: String,
}

impl TerraformProvisioner {
	pub fn new(binary: impl Into<String>) -> Self {
		Self {
			binary: binary.into(),
		}
	}

	fn command(&self, invocation: &PhaseInvocation<'_>) -> Command {
		let mut command = Command::new(&self.binary);
		command
			.kill_on_drop(true)
			.arg(format!("-chdir={}", invocation.module_dir.display()))
			.args(&invocation.args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());
		for (name, value) in invocation.credentials.env_vars() {
			command.env(name, value);
		}
		command
	}
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
	#[tracing::instrument(
		skip(self, invocation),
		fields(run_id = invocation.run_id, phase = %invocation.phase)
	)]
	async fn run_phase(&self, invocation: PhaseInvocation<'_>) -> Result<PhaseOutput, PhaseError> {
		let command = self.command(&invocation);
		tracing::info!(
			binary = %self.binary,
			module_dir = %invocation.module_dir.display(),
			args = ?invocation.args,
			"exec terraform"
		);

		let run = run_to_completion(command, invocation.run_id, invocation.phase);
		match tokio::time::timeout_at(invocation.deadline, run).await {
			Ok(result) => result,
			Err(_) => {
				tracing::warn!("terraform phase deadline exceeded, process killed");
				Err(PhaseError::Timeout)
			}
		}
	}
}

async fn run_to_completion(
	mut command: Command,
	run_id: i64,
	phase: Phase,
) -> Result<PhaseOutput, PhaseError> {
	let mut child = command.spawn()?;
	let stdout = child.stdout.take();
	let stderr = child.stderr.take();

	let stdout_task = async {
		match stdout {
			Some(mut out) if phase.captures_stdout() => {
				let mut buf = Vec::new();
				out.read_to_end(&mut buf).await?;
				Ok::<_, std::io::Error>(buf)
			}
			Some(out) => {
				forward_lines(out, run_id, phase, "stdout", 0).await?;
				Ok(Vec::new())
			}
			None => Ok(Vec::new()),
		}
	};
	let stderr_task = async {
		match stderr {
			Some(err) => forward_lines(err, run_id, phase, "stderr", STDERR_TAIL_LINES).await,
			None => Ok(VecDeque::new()),
		}
	};

	let (stdout, stderr_tail) = tokio::try_join!(stdout_task, stderr_task)?;
	let status = child.wait().await?;

	if status.success() {
		Ok(PhaseOutput { stdout })
	} else {
		Err(PhaseError::Exit {
			code: status.code(),
			stderr: Vec::from(stderr_tail).join("\n"),
		})
	}
}

/// Log each line of `reader` and return the last `keep` lines.
///
/// Lines are split on raw bytes; invalid UTF-8 is replaced, never an error.
async fn forward_lines<R: AsyncRead + Unpin>(
	reader: R,
	run_id: i64,
	phase: Phase,
	stream: &'static str,
	keep: usize,
) -> std::io::Result<VecDeque<String>> {
	let mut reader = BufReader::new(reader);
	let mut raw = Vec::new();
	let mut tail = VecDeque::with_capacity(keep);
	loop {
		raw.clear();
		if reader.read_until(b'\n', &mut raw).await? == 0 {
			break;
		}
		let trimmed = raw.strip_suffix(b"\n").unwrap_or(&raw[..]);
		let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
		let line = String::from_utf8_lossy(trimmed).into_owned();
		tracing::info!(target: TOOL_LOG_TARGET, run_id, phase = %phase, stream, "{line}");
		if keep > 0 {
			if tail.len() == keep {
				tail.pop_front();
			}
			tail.push_back(line);
		}
	}
	Ok(tail)
}
