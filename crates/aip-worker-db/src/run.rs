// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Run lifecycle and deployment output persistence.
//!
//! A run moves strictly forward: `queued -> running -> succeeded | failed`.
//! `started_at` and `finished_at` are written with set-if-unset semantics so
//! repeating a transition never moves a timestamp. The one exception is
//! [`RunRepository::mark_failed`], which always records the latest summary and
//! finish time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
	Queued,
	Running,
	Succeeded,
	Failed,
}

impl RunStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			RunStatus::Queued => "queued",
			RunStatus::Running => "running",
			RunStatus::Succeeded => "succeeded",
			RunStatus::Failed => "failed",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, RunStatus::Succeeded | RunStatus::Failed)
	}
}

impl std::str::FromStr for RunStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"queued" => Ok(RunStatus::Queued),
			"running" => Ok(RunStatus::Running),
			"succeeded" => Ok(RunStatus::Succeeded),
			"failed" => Ok(RunStatus::Failed),
			_ => Err(format!("unknown run status: {s}")),
		}
	}
}

impl std::fmt::Display for RunStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One execution attempt of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
	pub id: i64,
	pub deployment_id: i64,
	/// Stored as written by the intake layer; the worker does not validate it.
	pub action: String,
	pub status: RunStatus,
	pub summary: Option<String>,
	pub started_at: Option<DateTime<Utc>>,
	pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
	pub id: i64,
	pub blueprint_id: i64,
	pub environment_id: i64,
	pub status: String,
	pub outputs_json: Option<serde_json::Value>,
}

type RunRow = (
	i64,
	i64,
	String,
	String,
	Option<String>,
	Option<DateTime<Utc>>,
	Option<DateTime<Utc>>,
);

fn run_from_row(row: RunRow) -> Result<Run> {
	let (id, deployment_id, action, status, summary, started_at, finished_at) = row;
	Ok(Run {
		id,
		deployment_id,
		action,
		status: status.parse().map_err(DbError::Decode)?,
		summary,
		started_at,
		finished_at,
	})
}

#[derive(Clone)]
pub struct RunRepository {
	pool: SqlitePool,
}

impl RunRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Move a run to `running`, stamping `started_at` on first call only.
	///
	/// Terminal runs are left untouched and reported as [`DbError::RunFinished`].
	#[tracing::instrument(skip(self))]
	pub async fn mark_running(&self, run_id: i64) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE runs
			SET status = 'running',
			    started_at = COALESCE(started_at, ?)
			WHERE id = ?
			  AND status IN ('queued', 'running')
			"#,
		)
		.bind(Utc::now())
		.bind(run_id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(self.unchanged(run_id).await);
		}

		Ok(())
	}

	/// A run that already failed is left untouched and reported as
	/// [`DbError::RunFinished`].
	#[tracing::instrument(skip(self))]
	pub async fn mark_succeeded(&self, run_id: i64) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE runs
			SET status = 'succeeded',
			    finished_at = COALESCE(finished_at, ?)
			WHERE id = ?
			  AND status IN ('queued', 'running', 'succeeded')
			"#,
		)
		.bind(Utc::now())
		.bind(run_id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(self.unchanged(run_id).await);
		}

		Ok(())
	}

	/// Overwrites `summary` and `finished_at` on every call. A run that
	/// already succeeded is left untouched and reported as
	/// [`DbError::RunFinished`].
	#[tracing::instrument(skip(self, summary), fields(summary_len = summary.len()))]
	pub async fn mark_failed(&self, run_id: i64, summary: &str) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE runs
			SET status = 'failed',
			    summary = ?,
			    finished_at = ?
			WHERE id = ?
			  AND status IN ('queued', 'running', 'failed')
			"#,
		)
		.bind(summary)
		.bind(Utc::now())
		.bind(run_id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(self.unchanged(run_id).await);
		}

		Ok(())
	}

	/// Classify an update that matched no row.
	async fn unchanged(&self, run_id: i64) -> DbError {
		match self.get_run(run_id).await {
			Ok(Some(_)) => DbError::RunFinished(run_id),
			Ok(None) => DbError::RunNotFound(run_id),
			Err(err) => err,
		}
	}

	/// Overwrite `outputs_json` on the deployment that owns `run_id`.
	///
	/// Returns the id of the deployment that was updated.
	#[tracing::instrument(skip(self, outputs))]
	pub async fn update_deployment_outputs(
		&self,
		run_id: i64,
		outputs: &serde_json::Value,
	) -> Result<i64> {
		let deployment_id =
			sqlx::query_as::<_, (i64,)>("SELECT deployment_id FROM runs WHERE id = ?")
				.bind(run_id)
				.fetch_optional(&self.pool)
				.await?
				.map(|row| row.0)
				.ok_or(DbError::RunNotFound(run_id))?;

		let outputs_str = serde_json::to_string(outputs)?;
		let result = sqlx::query("UPDATE deployments SET outputs_json = ? WHERE id = ?")
			.bind(outputs_str)
			.bind(deployment_id)
			.execute(&self.pool)
			.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::DeploymentNotFound(run_id));
		}

		tracing::debug!(deployment_id, "deployment outputs updated");
		Ok(deployment_id)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_run(&self, run_id: i64) -> Result<Option<Run>> {
		let row = sqlx::query_as::<_, RunRow>(
			r#"
			SELECT id, deployment_id, action, status, summary, started_at, finished_at
			FROM runs
			WHERE id = ?
			"#,
		)
		.bind(run_id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(run_from_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_deployment(&self, deployment_id: i64) -> Result<Option<Deployment>> {
		let row = sqlx::query_as::<_, (i64, i64, i64, String, Option<String>)>(
			r#"
			SELECT id, blueprint_id, environment_id, status, outputs_json
			FROM deployments
			WHERE id = ?
			"#,
		)
		.bind(deployment_id)
		.fetch_optional(&self.pool)
		.await?;

		row
			.map(
				|(id, blueprint_id, environment_id, status, outputs_json)| -> Result<Deployment> {
					Ok(Deployment {
						id,
						blueprint_id,
						environment_id,
						status,
						outputs_json: outputs_json
							.as_deref()
							.map(serde_json::from_str::<serde_json::Value>)
							.transpose()?,
					})
				},
			)
			.transpose()
	}
}

#[async_trait]
pub trait RunStore: Send + Sync {
	async fn mark_running(&self, run_id: i64) -> Result<()>;
	async fn mark_succeeded(&self, run_id: i64) -> Result<()>;
	async fn mark_failed(&self, run_id: i64, summary: &str) -> Result<()>;
	async fn update_deployment_outputs(
		&self,
		run_id: i64,
		outputs: &serde_json::Value,
	) -> Result<i64>;
	async fn get_run(&self, run_id: i64) -> Result<Option<Run>>;
	async fn get_deployment(&self, deployment_id: i64) -> Result<Option<Deployment>>;
}

#[async_trait]
impl RunStore for RunRepository {
	async fn mark_running(&self, run_id: i64) -> Result<()> {
		self.mark_running(run_id).await
	}

	async fn mark_succeeded(&self, run_id: i64) -> Result<()> {
		self.mark_succeeded(run_id).await
	}

	async fn mark_failed(&self, run_id: i64, summary: &str) -> Result<()> {
		self.mark_failed(run_id, summary).await
	}

	async fn update_deployment_outputs(
		&self,
		run_id: i64,
		outputs: &serde_json::Value,
	) -> Result<i64> {
		self.update_deployment_outputs(run_id, outputs).await
	}

	async fn get_run(&self, run_id: i64) -> Result<Option<Run>> {
		self.get_run(run_id).await
	}

	async fn get_deployment(&self, deployment_id: i64) -> Result<Option<Deployment>> {
		self.get_deployment(deployment_id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_run_test_pool, insert_deployment, insert_run};
	use proptest::prelude::*;

	async fn setup() -> (SqlitePool, RunRepository) {
		let pool = create_run_test_pool().await;
		insert_deployment(&pool, 7, None).await;
		insert_run(&pool, 1, 7, "apply").await;
		let repo = RunRepository::new(pool.clone());
		(pool, repo)
	}

	#[tokio::test]
	async fn test_get_run_queued() {
		let (_pool, repo) = setup().await;

		let run = repo.get_run(1).await.unwrap().unwrap();
		assert_eq!(run.deployment_id, 7);
		assert_eq!(run.action, "apply");
		assert_eq!(run.status, RunStatus::Queued);
		assert!(run.started_at.is_none());
		assert!(run.finished_at.is_none());
	}

	#[tokio::test]
	async fn test_get_run_missing() {
		let (_pool, repo) = setup().await;
		assert!(repo.get_run(999).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_mark_running_sets_started_at_once() {
		let (pool, repo) = setup().await;

		repo.mark_running(1).await.unwrap();
		let first = repo.get_run(1).await.unwrap().unwrap();
		assert_eq!(first.status, RunStatus::Running);
		let started_at = first.started_at.unwrap();

		sqlx::query("UPDATE runs SET started_at = ? WHERE id = 1")
			.bind(started_at - chrono::Duration::minutes(5))
			.execute(&pool)
			.await
			.unwrap();

		repo.mark_running(1).await.unwrap();
		let second = repo.get_run(1).await.unwrap().unwrap();
		assert_eq!(
			second.started_at.unwrap(),
			started_at - chrono::Duration::minutes(5)
		);
	}

	#[tokio::test]
	async fn test_mark_running_refuses_terminal_run() {
		let (_pool, repo) = setup().await;

		repo.mark_running(1).await.unwrap();
		repo.mark_succeeded(1).await.unwrap();

		let result = repo.mark_running(1).await;
		assert!(matches!(result, Err(DbError::RunFinished(1))));

		let run = repo.get_run(1).await.unwrap().unwrap();
		assert_eq!(run.status, RunStatus::Succeeded);
	}

	#[tokio::test]
	async fn test_mark_running_not_found() {
		let (_pool, repo) = setup().await;
		let result = repo.mark_running(404).await;
		assert!(matches!(result, Err(DbError::RunNotFound(404))));
	}

	#[tokio::test]
	async fn test_mark_succeeded_sets_finished_at_once() {
		let (_pool, repo) = setup().await;

		repo.mark_running(1).await.unwrap();
		repo.mark_succeeded(1).await.unwrap();
		let first = repo.get_run(1).await.unwrap().unwrap();
		assert_eq!(first.status, RunStatus::Succeeded);
		let finished_at = first.finished_at.unwrap();

		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		repo.mark_succeeded(1).await.unwrap();
		let second = repo.get_run(1).await.unwrap().unwrap();
		assert_eq!(second.finished_at.unwrap(), finished_at);
	}

	#[tokio::test]
	async fn test_mark_failed_overwrites_summary_and_finished_at() {
		let (_pool, repo) = setup().await;

		repo.mark_running(1).await.unwrap();
		repo.mark_failed(1, "terraform init failed").await.unwrap();
		let first = repo.get_run(1).await.unwrap().unwrap();
		assert_eq!(first.status, RunStatus::Failed);
		assert_eq!(first.summary.as_deref(), Some("terraform init failed"));

		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		repo.mark_failed(1, "terraform plan failed").await.unwrap();
		let second = repo.get_run(1).await.unwrap().unwrap();
		assert_eq!(second.summary.as_deref(), Some("terraform plan failed"));
		assert!(second.finished_at.unwrap() > first.finished_at.unwrap());
	}

	#[tokio::test]
	async fn test_mark_failed_leaves_succeeded_run() {
		let (_pool, repo) = setup().await;

		repo.mark_running(1).await.unwrap();
		repo.mark_succeeded(1).await.unwrap();
		let before = repo.get_run(1).await.unwrap().unwrap();

		let result = repo.mark_failed(1, "terraform plan failed").await;
		assert!(matches!(result, Err(DbError::RunFinished(1))));

		let after = repo.get_run(1).await.unwrap().unwrap();
		assert_eq!(after.status, RunStatus::Succeeded);
		assert_eq!(after.summary, None);
		assert_eq!(after.finished_at, before.finished_at);
	}

	#[tokio::test]
	async fn test_mark_succeeded_leaves_failed_run() {
		let (_pool, repo) = setup().await;

		repo.mark_running(1).await.unwrap();
		repo.mark_failed(1, "terraform init failed").await.unwrap();
		let before = repo.get_run(1).await.unwrap().unwrap();

		let result = repo.mark_succeeded(1).await;
		assert!(matches!(result, Err(DbError::RunFinished(1))));

		let after = repo.get_run(1).await.unwrap().unwrap();
		assert_eq!(after.status, RunStatus::Failed);
		assert_eq!(after.summary.as_deref(), Some("terraform init failed"));
		assert_eq!(after.finished_at, before.finished_at);
	}

	#[tokio::test]
	async fn test_mark_succeeded_not_found() {
		let (_pool, repo) = setup().await;
		let result = repo.mark_succeeded(404).await;
		assert!(matches!(result, Err(DbError::RunNotFound(404))));
	}

	#[tokio::test]
	async fn test_mark_failed_not_found() {
		let (_pool, repo) = setup().await;
		let result = repo.mark_failed(404, "boom").await;
		assert!(matches!(result, Err(DbError::RunNotFound(404))));
	}

	#[tokio::test]
	async fn test_update_deployment_outputs() {
		let (_pool, repo) = setup().await;

		let outputs = serde_json::json!({
			"service_url": { "value": "https://svc.example.com", "type": "string", "sensitive": false }
		});
		let deployment_id = repo.update_deployment_outputs(1, &outputs).await.unwrap();
		assert_eq!(deployment_id, 7);

		let deployment = repo.get_deployment(7).await.unwrap().unwrap();
		assert_eq!(deployment.outputs_json, Some(outputs));
	}

	#[tokio::test]
	async fn test_update_deployment_outputs_only_touches_outputs() {
		let (_pool, repo) = setup().await;
		let before = repo.get_deployment(7).await.unwrap().unwrap();

		repo
			.update_deployment_outputs(1, &serde_json::json!({}))
			.await
			.unwrap();

		let after = repo.get_deployment(7).await.unwrap().unwrap();
		assert_eq!(after.status, before.status);
		assert_eq!(after.blueprint_id, before.blueprint_id);
		assert_eq!(after.environment_id, before.environment_id);
		assert_eq!(after.outputs_json, Some(serde_json::json!({})));
	}

	#[tokio::test]
	async fn test_update_deployment_outputs_unknown_run() {
		let (_pool, repo) = setup().await;
		let result = repo
			.update_deployment_outputs(404, &serde_json::json!({}))
			.await;
		assert!(matches!(result, Err(DbError::RunNotFound(404))));
	}

	#[tokio::test]
	async fn test_update_deployment_outputs_orphaned_run() {
		let (pool, repo) = setup().await;
		insert_run(&pool, 2, 99, "apply").await;

		let result = repo
			.update_deployment_outputs(2, &serde_json::json!({}))
			.await;
		assert!(matches!(result, Err(DbError::DeploymentNotFound(2))));
	}

	#[tokio::test]
	async fn test_get_run_rejects_unknown_status() {
		let (pool, repo) = setup().await;
		sqlx::query("UPDATE runs SET status = 'exploded' WHERE id = 1")
			.execute(&pool)
			.await
			.unwrap();

		let result = repo.get_run(1).await;
		assert!(matches!(result, Err(DbError::Decode(_))));
	}

	#[test]
	fn test_terminal_statuses() {
		assert!(!RunStatus::Queued.is_terminal());
		assert!(!RunStatus::Running.is_terminal());
		assert!(RunStatus::Succeeded.is_terminal());
		assert!(RunStatus::Failed.is_terminal());
	}

	proptest! {
		#[test]
		fn unknown_status_strings_are_rejected(s in "[a-z_]{1,16}") {
			prop_assume!(!["queued", "running", "succeeded", "failed"].contains(&s.as_str()));
			prop_assert!(s.parse::<RunStatus>().is_err());
		}
	}
}
