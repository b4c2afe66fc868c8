// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration as read from a single source.

use serde::Deserialize;

use crate::sections::{
	AwsConfigLayer, DatabaseConfigLayer, LoggingConfigLayer, ProvisionerConfigLayer,
	QueueConfigLayer, WorkerPoolConfigLayer,
};

/// One source's view of the configuration. Sections a source does not
/// mention stay `None` and leave lower-precedence values in place.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerConfigLayer {
	pub database: Option<DatabaseConfigLayer>,
	pub queue: Option<QueueConfigLayer>,
	pub worker: Option<WorkerPoolConfigLayer>,
	pub provisioner: Option<ProvisionerConfigLayer>,
	pub aws: Option<AwsConfigLayer>,
	pub logging: Option<LoggingConfigLayer>,
}

impl WorkerConfigLayer {
	pub fn merge(&mut self, other: WorkerConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.queue, other.queue, QueueConfigLayer::merge);
		merge_section(&mut self.worker, other.worker, WorkerPoolConfigLayer::merge);
		merge_section(
			&mut self.provisioner,
			other.provisioner,
			ProvisionerConfigLayer::merge,
		);
		merge_section(&mut self.aws, other.aws, AwsConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_section<T>(target: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (target.as_mut(), other) {
		(Some(existing), Some(incoming)) => merge(existing, incoming),
		(None, Some(incoming)) => *target = Some(incoming),
		(_, None) => {}
	}
}
