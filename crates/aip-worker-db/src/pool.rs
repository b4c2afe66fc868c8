// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

const MAX_CONNECTIONS: u32 = 10;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create the pool shared by every worker in the process.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./aip.db")
///
/// The database file must already carry the `runs` and `deployments` tables;
/// the intake service owns the schema.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(BUSY_TIMEOUT);

	let pool = SqlitePoolOptions::new()
		.max_connections(MAX_CONNECTIONS)
		.max_lifetime(Duration::from_secs(180))
		.connect_with(options)
		.await?;

	tracing::debug!(max_connections = MAX_CONNECTIONS, "database pool created");
	Ok(pool)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_create_pool_requires_existing_database() {
		let result = create_pool("sqlite:/nonexistent-aip-dir/aip.db").await;
		assert!(matches!(result, Err(DbError::Sqlx(_))));
	}

	#[tokio::test]
	async fn test_create_pool_in_memory() {
		let pool = create_pool("sqlite::memory:").await.unwrap();
		let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
		assert_eq!(row.0, 1);
	}
}
