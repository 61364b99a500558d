// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization engine configuration.

use std::path::PathBuf;

use loom_authz_core::{Mode, DEFAULT_STAGE_LIMIT};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_POLICY_PATH: &str = "config/casbin/policy.csv";
const DEFAULT_USER_HEADER: &str = "x-authenticated-user";
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 20;

/// Where policy rows are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyBackend {
	#[default]
	File,
	Sqlite,
}

impl std::str::FromStr for PolicyBackend {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"file" | "csv" => Ok(PolicyBackend::File),
			"sqlite" | "db" => Ok(PolicyBackend::Sqlite),
			other => Err(format!("unknown policy backend '{other}'")),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthzConfig {
	pub mode: Mode,
	/// YAML file holding `mode:`; read on every decision when set.
	pub mode_file: Option<PathBuf>,
	pub policy_path: PathBuf,
	pub policy_backend: PolicyBackend,
	/// Trusted header carrying the authenticated user id.
	pub user_header: String,
	pub rate_limit_per_minute: u32,
	pub stage_limit: usize,
}

impl Default for AuthzConfig {
	fn default() -> Self {
		AuthzConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthzConfigLayer {
	#[serde(default)]
	pub mode: Option<String>,
	#[serde(default)]
	pub mode_file: Option<PathBuf>,
	#[serde(default)]
	pub policy_path: Option<PathBuf>,
	#[serde(default)]
	pub policy_backend: Option<PolicyBackend>,
	#[serde(default)]
	pub user_header: Option<String>,
	#[serde(default)]
	pub rate_limit_per_minute: Option<u32>,
	#[serde(default)]
	pub stage_limit: Option<usize>,
}

impl AuthzConfigLayer {
	pub fn merge(&mut self, other: AuthzConfigLayer) {
		if other.mode.is_some() {
			self.mode = other.mode;
		}
		if other.mode_file.is_some() {
			self.mode_file = other.mode_file;
		}
		if other.policy_path.is_some() {
			self.policy_path = other.policy_path;
		}
		if other.policy_backend.is_some() {
			self.policy_backend = other.policy_backend;
		}
		if other.user_header.is_some() {
			self.user_header = other.user_header;
		}
		if other.rate_limit_per_minute.is_some() {
			self.rate_limit_per_minute = other.rate_limit_per_minute;
		}
		if other.stage_limit.is_some() {
			self.stage_limit = other.stage_limit;
		}
	}

	/// Unknown mode strings fall back to shadow.
	pub fn finalize(self) -> AuthzConfig {
		let mode = match self.mode.as_deref() {
			None => Mode::default(),
			Some(raw) => raw.parse().unwrap_or_else(|_| {
				warn!(value = %raw, "unknown authz mode, using shadow");
				Mode::Shadow
			}),
		};
		AuthzConfig {
			mode,
			mode_file: self.mode_file,
			policy_path: self
				.policy_path
				.unwrap_or_else(|| PathBuf::from(DEFAULT_POLICY_PATH)),
			policy_backend: self.policy_backend.unwrap_or_default(),
			user_header: self
				.user_header
				.map(|h| h.trim().to_ascii_lowercase())
				.filter(|h| !h.is_empty())
				.unwrap_or_else(|| DEFAULT_USER_HEADER.to_string()),
			rate_limit_per_minute: self
				.rate_limit_per_minute
				.filter(|n| *n > 0)
				.unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE),
			stage_limit: self
				.stage_limit
				.filter(|n| *n > 0)
				.unwrap_or(DEFAULT_STAGE_LIMIT),
		}
	}
}
