// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory schema helpers for tests.
//!
//! The tables mirror the columns the worker touches; production schema is
//! owned by the intake service.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// A single-connection in-memory pool, so every query sees the same database.
pub async fn create_test_pool() -> SqlitePool {
	SqlitePoolOptions::new()
		.max_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect("sqlite::memory:")
		.await
		.unwrap()
}

pub async fn create_deployments_table(pool: &SqlitePool) {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS deployments (
			id INTEGER PRIMARY KEY,
			blueprint_id INTEGER NOT NULL,
			environment_id INTEGER NOT NULL,
			status TEXT NOT NULL,
			outputs_json TEXT
		)
		"#,
	)
	.execute(pool)
	.await
	.unwrap();
}

pub async fn create_runs_table(pool: &SqlitePool) {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS runs (
			id INTEGER PRIMARY KEY,
			deployment_id INTEGER NOT NULL,
			action TEXT NOT NULL,
			status TEXT NOT NULL DEFAULT 'queued',
			summary TEXT,
			started_at TEXT,
			finished_at TEXT
		)
		"#,
	)
	.execute(pool)
	.await
	.unwrap();
}

pub async fn create_run_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	create_deployments_table(&pool).await;
	create_runs_table(&pool).await;
	pool
}

pub async fn insert_deployment(pool: &SqlitePool, id: i64, outputs_json: Option<&str>) {
	sqlx::query(
		r#"
		INSERT INTO deployments (id, blueprint_id, environment_id, status, outputs_json)
		VALUES (?, 1, 1, 'active', ?)
		"#,
	)
	.bind(id)
	.bind(outputs_json)
	.execute(pool)
	.await
	.unwrap();
}

/// Insert a `queued` run, the way the intake layer does before enqueueing.
pub async fn insert_run(pool: &SqlitePool, id: i64, deployment_id: i64, action: &str) {
	sqlx::query("INSERT INTO runs (id, deployment_id, action, status) VALUES (?, ?, ?, 'queued')")
		.bind(id)
		.bind(deployment_id)
		.bind(action)
		.execute(pool)
		.await
		.unwrap();
}
