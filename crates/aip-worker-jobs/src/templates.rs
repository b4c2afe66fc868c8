// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::path::PathBuf;

use aip_worker_config::ProvisionerConfig;

use crate::error::{JobError, Result};

/// Allow-list of template keys and the terraform module each one runs.
///
/// Only keys present here are executed; the job payload can never name a
/// directory directly.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
	modules_root: PathBuf,
	templates: BTreeMap<String, PathBuf>,
}

impl TemplateCatalog {
	pub fn new(modules_root: impl Into<PathBuf>, templates: BTreeMap<String, PathBuf>) -> Self {
		Self {
			modules_root: modules_root.into(),
			templates,
		}
	}

	pub fn from_config(config: &ProvisionerConfig) -> Self {
		Self::new(config.modules_root.clone(), config.templates.clone())
	}

	pub fn resolve(&self, template_key: &str) -> Result<PathBuf> {
		let dir = self
			.templates
			.get(template_key)
			.ok_or_else(|| JobError::UnsupportedTemplate(template_key.to_string()))?;

		if dir.is_absolute() {
			Ok(dir.clone())
		} else {
			Ok(self.modules_root.join(dir))
		}
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.templates.keys().map(String::as_str)
	}
}
