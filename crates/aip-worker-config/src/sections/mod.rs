// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod aws;
mod database;
mod logging;
mod provisioner;
mod queue;
mod worker;

pub use aws::{AwsConfig, AwsConfigLayer, MAX_SESSION_DURATION_SECS, MIN_SESSION_DURATION_SECS};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use provisioner::{parse_template_list, ProvisionerConfig, ProvisionerConfigLayer};
pub use queue::{QueueConfig, QueueConfigLayer};
pub use worker::{WorkerPoolConfig, WorkerPoolConfigLayer};
