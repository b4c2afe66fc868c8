// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job-scoped AWS credentials.
//!
//! Every job assumes the customer's role afresh. The resulting
//! [`ScopedCredentials`] live only for the duration of that job: they are not
//! `Clone`, `Serialize` or `Display`, their `Debug` output is redacted, and the
//! secret material is zeroized when dropped.

use std::fmt;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sts::config::Region;
use aws_sdk_sts::error::DisplayErrorContext;
use zeroize::{Zeroize, ZeroizeOnDrop};

use aip_worker_config::AwsConfig;

use crate::envelope::RoleDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
	#[error("missing roleArn in job aws descriptor")]
	MissingRoleArn,

	#[error("missing externalId in job aws descriptor")]
	MissingExternalId,

	#[error("STS AssumeRole error: {0}")]
	Exchange(String),

	#[error("STS AssumeRole returned no credentials")]
	NoCredentials,
}

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ScopedCredentials {
	access_key_id: String,
	secret_access_key: String,
	session_token: String,
	region: String,
}

impl ScopedCredentials {
	pub fn new(
		access_key_id: impl Into<String>,
		secret_access_key: impl Into<String>,
		session_token: impl Into<String>,
		region: impl Into<String>,
	) -> Self {
		Self {
			access_key_id: access_key_id.into(),
			secret_access_key: secret_access_key.into(),
			session_token: session_token.into(),
			region: region.into(),
		}
	}

	pub fn region(&self) -> &str {
		&self.region
	}

	/// The variables a child process needs to act as the assumed role.
	pub fn env_vars(&self) -> [(&'static str, &str); 4] {
		[
			("AWS_ACCESS_KEY_ID", self.access_key_id.as_str()),
			("AWS_SECRET_ACCESS_KEY", self.secret_access_key.as_str()),
			("AWS_SESSION_TOKEN", self.session_token.as_str()),
			("AWS_REGION", self.region.as_str()),
		]
	}
}

impl fmt::Debug for ScopedCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScopedCredentials")
			.field("access_key_id", &"[REDACTED]")
			.field("secret_access_key", &"[REDACTED]")
			.field("session_token", &"[REDACTED]")
			.field("region", &self.region)
			.finish()
	}
}

/// A role descriptor that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRole {
	pub role_arn: String,
	pub external_id: String,
	pub region: String,
}

impl RoleDescriptor {
	/// Check the descriptor before any network traffic. An absent or empty
	/// region falls back to `default_region`.
	pub fn resolve(&self, default_region: &str) -> Result<ResolvedRole, CredentialError> {
		let role_arn = non_empty(&self.role_arn).ok_or(CredentialError::MissingRoleArn)?;
		let external_id = non_empty(&self.external_id).ok_or(CredentialError::MissingExternalId)?;
		let region = non_empty(&self.region).unwrap_or(default_region);

		Ok(ResolvedRole {
			role_arn: role_arn.to_string(),
			external_id: external_id.to_string(),
			region: region.to_string(),
		})
	}
}

fn non_empty(value: &Option<String>) -> Option<&str> {
	value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[async_trait]
pub trait CredentialBroker: Send + Sync {
	async fn acquire(
		&self,
		run_id: i64,
		role: &RoleDescriptor,
	) -> Result<ScopedCredentials, CredentialError>;
}

/// Exchanges the worker's own AWS identity for the customer role via STS.
pub struct StsCredentialBroker {
	sdk_config: aws_config::SdkConfig,
	settings: AwsConfig,
}

impl StsCredentialBroker {
	pub fn new(sdk_config: aws_config::SdkConfig, settings: AwsConfig) -> Self {
		Self {
			sdk_config,
			settings,
		}
	}

	/// Load the worker's platform identity from the standard AWS provider chain.
	pub async fn from_env(settings: AwsConfig) -> Self {
		let sdk_config = aws_config::defaults(BehaviorVersion::latest())
			.region(Region::new(settings.default_region.clone()))
			.load()
			.await;
		Self::new(sdk_config, settings)
	}

	fn session_name(&self, run_id: i64) -> String {
		format!("{}-{}", self.settings.session_name_prefix, run_id)
	}
}

#[async_trait]
impl CredentialBroker for StsCredentialBroker {
	#[tracing::instrument(skip(self, role), fields(region))]
	async fn acquire(
		&self,
		run_id: i64,
		role: &RoleDescriptor,
	) -> Result<ScopedCredentials, CredentialError> {
		let resolved = role.resolve(&self.settings.default_region)?;
		tracing::Span::current().record("region", resolved.region.as_str());

		let sts_config = aws_sdk_sts::config::Builder::from(&self.sdk_config)
			.region(Region::new(resolved.region.clone()))
			.build();
		let client = aws_sdk_sts::Client::from_conf(sts_config);

		let output = client
			.assume_role()
			.role_arn(&resolved.role_arn)
			.external_id(&resolved.external_id)
			.role_session_name(self.session_name(run_id))
			.duration_seconds(self.settings.session_duration_secs)
			.send()
			.await
			.map_err(|e| CredentialError::Exchange(DisplayErrorContext(&e).to_string()))?;

		let credentials = output.credentials().ok_or(CredentialError::NoCredentials)?;

		tracing::debug!(run_id, "assumed customer role");
		Ok(ScopedCredentials::new(
			credentials.access_key_id(),
			credentials.secret_access_key(),
			credentials.session_token(),
			resolved.region,
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn descriptor(arn: Option<&str>, ext: Option<&str>, region: Option<&str>) -> RoleDescriptor {
		RoleDescriptor {
			role_arn: arn.map(String::from),
			external_id: ext.map(String::from),
			region: region.map(String::from),
		}
	}

	#[test]
	fn test_resolve_complete_descriptor() {
		let role = descriptor(
			Some("arn:aws:iam::123456789012:role/aip"),
			Some("ext-1"),
			Some("us-west-2"),
		);
		let resolved = role.resolve("ap-northeast-1").unwrap();
		assert_eq!(resolved.role_arn, "arn:aws:iam::123456789012:role/aip");
		assert_eq!(resolved.external_id, "ext-1");
		assert_eq!(resolved.region, "us-west-2");
	}

	#[test]
	fn test_resolve_defaults_region() {
		for region in [None, Some("")] {
			let role = descriptor(Some("arn:aws:iam::1:role/r"), Some("ext"), region);
			assert_eq!(role.resolve("ap-northeast-1").unwrap().region, "ap-northeast-1");
		}
	}

	#[test]
	fn test_resolve_missing_role_arn() {
		let role = descriptor(Some(""), Some("ext"), None);
		assert!(matches!(
			role.resolve("ap-northeast-1"),
			Err(CredentialError::MissingRoleArn)
		));
	}

	#[test]
	fn test_resolve_missing_external_id() {
		let role = descriptor(Some("arn:aws:iam::1:role/r"), None, None);
		assert!(matches!(
			role.resolve("ap-northeast-1"),
			Err(CredentialError::MissingExternalId)
		));
	}

	#[test]
	fn test_debug_redacts_secrets() {
		let creds = ScopedCredentials::new("AKIAEXAMPLE", "wJalrXUtnFEMI", "FwoGZXIvYXdzEJr", "eu-west-1");
		let debug = format!("{creds:?}");
		assert!(debug.contains("[REDACTED]"));
		assert!(debug.contains("eu-west-1"));
		assert!(!debug.contains("AKIAEXAMPLE"));
		assert!(!debug.contains("wJalrXUtnFEMI"));
		assert!(!debug.contains("FwoGZXIvYXdzEJr"));
	}

	#[test]
	fn test_env_vars() {
		let creds = ScopedCredentials::new("AKIA", "secret", "token", "ap-northeast-1");
		let vars = creds.env_vars();
		assert_eq!(vars[0], ("AWS_ACCESS_KEY_ID", "AKIA"));
		assert_eq!(vars[1], ("AWS_SECRET_ACCESS_KEY", "secret"));
		assert_eq!(vars[2], ("AWS_SESSION_TOKEN", "token"));
		assert_eq!(vars[3], ("AWS_REGION", "ap-northeast-1"));
	}

	#[tokio::test]
	async fn test_sts_broker_validates_before_network() {
		let sdk_config = aws_config::SdkConfig::builder()
			.behavior_version(BehaviorVersion::latest())
			.build();
		let broker = StsCredentialBroker::new(sdk_config, AwsConfig::default());
		let role = descriptor(Some("arn:aws:iam::1:role/r"), Some(""), None);

		let result = broker.acquire(42, &role).await;
		assert!(matches!(result, Err(CredentialError::MissingExternalId)));
	}

	#[test]
	fn test_session_name() {
		let sdk_config = aws_config::SdkConfig::builder()
			.behavior_version(BehaviorVersion::latest())
			.build();
		let broker = StsCredentialBroker::new(sdk_config, AwsConfig::default());
		assert_eq!(broker.session_name(42), "aip-run-42");
	}
}
