// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),

	#[error("queue unavailable: {0}")]
	Unavailable(String),
}

/// Shared FIFO of serialized job payloads.
///
/// A popped payload belongs to the caller; there is no acknowledgement or
/// redelivery.
#[async_trait]
pub trait JobQueue: Send + Sync {
	/// Wait up to `wait` for the next payload. `Ok(None)` means the wait
	/// elapsed with nothing queued.
	async fn pop(&self, wait: Duration) -> Result<Option<String>, QueueError>;

	async fn push(&self, payload: &str) -> Result<(), QueueError>;
}

/// Redis list consumed with `BLPOP` and produced with `RPUSH`.
///
/// Redis serves a blocking command to completion before anything else on the
/// same connection, so every waiting `BLPOP` gets a connection of its own.
/// Idle ones are kept for the next pop; a connection that errored is dropped.
pub struct RedisJobQueue {
	client: redis::Client,
	connection: ConnectionManager,
	blocking: Mutex<Vec<MultiplexedConnection>>,
	key: String,
}

impl RedisJobQueue {
	pub async fn connect(redis_url: &str, key: impl Into<String>) -> Result<Self, QueueError> {
		let client = redis::Client::open(redis_url)?;
		let connection = ConnectionManager::new(client.clone()).await?;
		Ok(Self {
			client,
			connection,
			blocking: Mutex::new(Vec::new()),
			key: key.into(),
		})
	}

	async fn checkout_blocking(&self) -> Result<MultiplexedConnection, QueueError> {
		let idle = self.blocking.lock().await.pop();
		match idle {
			Some(conn) => Ok(conn),
			None => Ok(self.client.get_multiplexed_async_connection().await?),
		}
	}

	pub async fn ping(&self) -> Result<(), QueueError> {
		let mut conn = self.connection.clone();
		let _: String = redis::cmd("PING").query_async(&mut conn).await?;
		Ok(())
	}
}

#[async_trait]
impl JobQueue for RedisJobQueue {
	async fn pop(&self, wait: Duration) -> Result<Option<String>, QueueError> {
		let mut conn = self.checkout_blocking().await?;
		// BLPOP treats 0 as "block forever".
		let timeout_secs = wait.as_secs().max(1);
		let reply: Option<(String, String)> = redis::cmd("BLPOP")
			.arg(&self.key)
			.arg(timeout_secs)
			.query_async(&mut conn)
			.await?;
		self.blocking.lock().await.push(conn);
		Ok(reply.map(|(_, payload)| payload))
	}

	async fn push(&self, payload: &str) -> Result<(), QueueError> {
		let mut conn = self.connection.clone();
		let _: i64 = redis::cmd("RPUSH")
			.arg(&self.key)
			.arg(payload)
			.query_async(&mut conn)
			.await?;
		Ok(())
	}
}
