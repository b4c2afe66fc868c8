// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job payload carried on the queue.
//!
//! Wire format (producers write this, the worker only reads it):
//!
//! ```json
//! {
//!   "run_id": 42,
//!   "action": "apply",
//!   "blueprint_key": "ecs-service",
//!   "version": "1.0.0",
//!   "inputs": { "service_name": "api", "desired_count": 2 },
//!   "aws": { "roleArn": "arn:aws:iam::123456789012:role/aip", "externalId": "ext-1", "region": "ap-northeast-1" }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JobError, Result};

/// What the job asks terraform to do.
///
/// Unknown actions decode into [`Action::Other`] so a newer producer cannot
/// wedge the consumer; the consumer treats them as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
	Plan,
	Apply,
	Other(String),
}

impl Action {
	pub fn as_str(&self) -> &str {
		match self {
			Action::Plan => "plan",
			Action::Apply => "apply",
			Action::Other(s) => s,
		}
	}
}

impl From<String> for Action {
	fn from(s: String) -> Self {
		match s.as_str() {
			"plan" => Action::Plan,
			"apply" => Action::Apply,
			_ => Action::Other(s),
		}
	}
}

impl From<Action> for String {
	fn from(action: Action) -> Self {
		match action {
			Action::Other(s) => s,
			known => known.as_str().to_string(),
		}
	}
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The customer role the job runs as. Every field is optional on the wire;
/// the credential broker rejects incomplete descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
	#[serde(rename = "roleArn", default, skip_serializing_if = "Option::is_none")]
	pub role_arn: Option<String>,
	#[serde(rename = "externalId", default, skip_serializing_if = "Option::is_none")]
	pub external_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
	pub run_id: i64,
	pub action: Action,
	#[serde(rename = "blueprint_key")]
	pub template_key: String,
	#[serde(rename = "version", default)]
	pub template_version: String,
	/// Passed to terraform as `-var` arguments, in key order.
	#[serde(default)]
	pub inputs: BTreeMap<String, Value>,
	#[serde(rename = "aws", default)]
	pub role: RoleDescriptor,
}

impl JobEnvelope {
	pub fn decode(payload: &str) -> Result<Self> {
		serde_json::from_str(payload).map_err(JobError::Decode)
	}

	pub fn encode(&self) -> Result<String> {
		serde_json::to_string(self).map_err(JobError::Decode)
	}
}
