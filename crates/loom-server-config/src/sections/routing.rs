// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Route allowlist location.

use std::path::PathBuf;

use loom_common_routing::{default_allowlist_path, DEFAULT_ENTRYPOINT};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
	pub allowlist_path: PathBuf,
	pub entrypoint: String,
}

impl Default for RoutingConfig {
	fn default() -> Self {
		RoutingConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingConfigLayer {
	#[serde(default)]
	pub allowlist_path: Option<PathBuf>,
	#[serde(default)]
	pub entrypoint: Option<String>,
}

impl RoutingConfigLayer {
	pub fn merge(&mut self, other: RoutingConfigLayer) {
		if other.allowlist_path.is_some() {
			self.allowlist_path = other.allowlist_path;
		}
		if other.entrypoint.is_some() {
			self.entrypoint = other.entrypoint;
		}
	}

	pub fn finalize(self) -> RoutingConfig {
		RoutingConfig {
			allowlist_path: self.allowlist_path.unwrap_or_else(default_allowlist_path),
			entrypoint: self
				.entrypoint
				.map(|e| e.trim().to_string())
				.filter(|e| !e.is_empty())
				.unwrap_or_else(|| DEFAULT_ENTRYPOINT.to_string()),
		}
	}
}
