// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # aip-worker-db
//!
//! Persistence for the provisioning worker: the `runs` and `deployments`
//! tables, accessed through sqlx.
//!
//! The worker never creates these rows. The intake layer inserts the
//! deployment and a `queued` run before enqueueing the job; this crate only
//! moves runs through their lifecycle and stores captured outputs.
//!
//! ## Repository Pattern
//!
//! - [`RunStore`] defines the interface the job engine depends on.
//! - [`RunRepository`] is the concrete implementation holding a `SqlitePool`.
//!
//! ## Error Handling
//!
//! | Variant | When |
//! |---------|------|
//! | `RunNotFound` | A run id given by the caller does not exist |
//! | `DeploymentNotFound` | The run exists but its owning deployment does not |
//! | `RunFinished` | A write would move a run that already reached a terminal status |
//! | `Sqlx` | Unexpected database errors, propagated via `?` |
//! | `Decode` | A stored column holds a value the enums cannot represent |

mod error;
pub mod pool;
pub mod run;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{DbError, Result};
pub use pool::create_pool;
pub use run::{Deployment, Run, RunRepository, RunStatus, RunStore};
