// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Run not found: {0}")]
	RunNotFound(i64),

	#[error("Deployment not found for run {0}")]
	DeploymentNotFound(i64),

	#[error("Run {0} already reached a terminal status")]
	RunFinished(i64),

	#[error("Invalid stored value: {0}")]
	Decode(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;
