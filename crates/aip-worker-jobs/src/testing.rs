// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process stand-ins for the queue, STS and terraform.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::credentials::{CredentialBroker, CredentialError, ScopedCredentials};
use crate::envelope::{Action, JobEnvelope, RoleDescriptor};
use crate::provisioner::{Phase, PhaseError, PhaseInvocation, PhaseOutput, Provisioner};
use crate::queue::{JobQueue, QueueError};

/// A job for the default `ecs-service` template with a complete role.
pub fn test_job(run_id: i64, action: Action) -> JobEnvelope {
	JobEnvelope {
		run_id,
		action,
		template_key: "ecs-service".to_string(),
		template_version: "1.0.0".to_string(),
		inputs: BTreeMap::from([("service_name".to_string(), json!("api"))]),
		role: RoleDescriptor {
			role_arn: Some("arn:aws:iam::123456789012:role/aip-provisioner".to_string()),
			external_id: Some("aip-external-id".to_string()),
			region: Some("ap-northeast-1".to_string()),
		},
	}
}

#[derive(Debug, Clone)]
enum Script {
	Succeed(Vec<u8>),
	Exit { code: i32, stderr: String },
	Timeout,
}

/// One recorded `run_phase` call. Only the credential region is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedInvocation {
	pub run_id: i64,
	pub phase: Phase,
	pub module_dir: PathBuf,
	pub args: Vec<String>,
	pub region: String,
	pub deadline: Instant,
}

/// Returns canned results per phase. Phases without a script succeed with
/// empty stdout.
#[derive(Default)]
pub struct ScriptedProvisioner {
	scripts: HashMap<Phase, Script>,
	invocations: Mutex<Vec<RecordedInvocation>>,
}

impl ScriptedProvisioner {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_stdout(mut self, phase: Phase, stdout: impl Into<Vec<u8>>) -> Self {
		self.scripts.insert(phase, Script::Succeed(stdout.into()));
		self
	}

	pub fn with_exit(mut self, phase: Phase, code: i32, stderr: impl Into<String>) -> Self {
		self.scripts.insert(
			phase,
			Script::Exit {
				code,
				stderr: stderr.into(),
			},
		);
		self
	}

	pub fn with_timeout(mut self, phase: Phase) -> Self {
		self.scripts.insert(phase, Script::Timeout);
		self
	}

	pub async fn invocations(&self) -> Vec<RecordedInvocation> {
		self.invocations.lock().await.clone()
	}

	pub async fn phases(&self) -> Vec<Phase> {
		self.invocations
			.lock()
			.await
			.iter()
			.map(|i| i.phase)
			.collect()
	}
}

#[async_trait]
impl Provisioner for ScriptedProvisioner {
	async fn run_phase(&self, invocation: PhaseInvocation<'_>) -> Result<PhaseOutput, PhaseError> {
		self.invocations.lock().await.push(RecordedInvocation {
			run_id: invocation.run_id,
			phase: invocation.phase,
			module_dir: invocation.module_dir.to_path_buf(),
			args: invocation.args.clone(),
			region: invocation.credentials.region().to_string(),
			deadline: invocation.deadline,
		});

		match self.scripts.get(&invocation.phase) {
			None => Ok(PhaseOutput::default()),
			Some(Script::Succeed(stdout)) => Ok(PhaseOutput {
				stdout: stdout.clone(),
			}),
			Some(Script::Exit { code, stderr }) => Err(PhaseError::Exit {
				code: Some(*code),
				stderr: stderr.clone(),
			}),
			Some(Script::Timeout) => Err(PhaseError::Timeout),
		}
	}
}

/// Validates descriptors like the STS broker, then hands out fixed
/// credentials without any network traffic.
pub struct StaticCredentialBroker {
	default_region: String,
	exchange_error: Option<String>,
	calls: Mutex<Vec<i64>>,
}

impl StaticCredentialBroker {
	pub fn new(default_region: impl Into<String>) -> Self {
		Self {
			default_region: default_region.into(),
			exchange_error: None,
			calls: Mutex::new(Vec::new()),
		}
	}

	/// Every valid request fails as if STS rejected it.
	pub fn rejecting(default_region: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			exchange_error: Some(message.into()),
			..Self::new(default_region)
		}
	}

	/// Run ids for which an exchange was attempted.
	pub async fn calls(&self) -> Vec<i64> {
		self.calls.lock().await.clone()
	}
}

impl Default for StaticCredentialBroker {
	fn default() -> Self {
		Self::new("ap-northeast-1")
	}
}

#[async_trait]
impl CredentialBroker for StaticCredentialBroker {
	async fn acquire(
		&self,
		run_id: i64,
		role: &RoleDescriptor,
	) -> Result<ScopedCredentials, CredentialError> {
		let resolved = role.resolve(&self.default_region)?;
		self.calls.lock().await.push(run_id);

		if let Some(message) = &self.exchange_error {
			return Err(CredentialError::Exchange(message.clone()));
		}

		Ok(ScopedCredentials::new(
			"ASIATESTACCESSKEY",
			"test-secret-access-key",
			"test-session-token",
			resolved.region,
		))
	}
}

/// FIFO queue in memory. Failures can be injected ahead of the next pops.
#[derive(Default)]
pub struct InMemoryJobQueue {
	items: Mutex<VecDeque<String>>,
	failures: Mutex<VecDeque<String>>,
	notify: Notify,
}

impl InMemoryJobQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn fail_next_pop(&self, message: impl Into<String>) {
		self.failures.lock().await.push_back(message.into());
	}

	pub async fn len(&self) -> usize {
		self.items.lock().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.items.lock().await.is_empty()
	}
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
	async fn pop(&self, wait: Duration) -> Result<Option<String>, QueueError> {
		if let Some(message) = self.failures.lock().await.pop_front() {
			return Err(QueueError::Unavailable(message));
		}

		let deadline = Instant::now() + wait;
		loop {
			let notified = self.notify.notified();
			if let Some(item) = self.items.lock().await.pop_front() {
				return Ok(Some(item));
			}
			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				return Ok(None);
			}
		}
	}

	async fn push(&self, payload: &str) -> Result<(), QueueError> {
		self.items.lock().await.push_back(payload.to_string());
		self.notify.notify_one();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_in_memory_queue_is_fifo() {
		let queue = InMemoryJobQueue::new();
		queue.push("first").await.unwrap();
		queue.push("second").await.unwrap();

		let wait = Duration::from_millis(10);
		assert_eq!(queue.pop(wait).await.unwrap().as_deref(), Some("first"));
		assert_eq!(queue.pop(wait).await.unwrap().as_deref(), Some("second"));
		assert_eq!(queue.pop(wait).await.unwrap(), None);
	}

	#[tokio::test(start_paused = true)]
	async fn test_in_memory_queue_wakes_blocked_pop() {
		let queue = std::sync::Arc::new(InMemoryJobQueue::new());
		let popper = {
			let queue = queue.clone();
			tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
		};
		tokio::task::yield_now().await;
		queue.push("late").await.unwrap();

		let popped = popper.await.unwrap().unwrap();
		assert_eq!(popped.as_deref(), Some("late"));
	}

	#[tokio::test]
	async fn test_in_memory_queue_injected_failure() {
		let queue = InMemoryJobQueue::new();
		queue.fail_next_pop("connection reset").await;
		queue.push("job").await.unwrap();

		let wait = Duration::from_millis(10);
		assert!(matches!(
			queue.pop(wait).await,
			Err(QueueError::Unavailable(_))
		));
		assert_eq!(queue.pop(wait).await.unwrap().as_deref(), Some("job"));
	}

	#[tokio::test]
	async fn test_static_broker_validates_descriptor() {
		let broker = StaticCredentialBroker::default();
		let mut role = test_job(1, Action::Plan).role;
		role.external_id = None;

		let result = broker.acquire(1, &role).await;
		assert!(matches!(result, Err(CredentialError::MissingExternalId)));
		assert!(broker.calls().await.is_empty());
	}
}
