// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Access control for operational endpoints in production.

use serde::Deserialize;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct OpsGuardConfig {
	pub enabled: bool,
	pub allowed_cidrs: Vec<String>,
	pub token: Option<String>,
	pub basic_user: Option<String>,
	pub basic_password: Option<String>,
	/// Header carrying the client address when behind a proxy.
	pub real_ip_header: Option<String>,
}

impl OpsGuardConfig {
	pub fn has_credentials(&self) -> bool {
		!self.allowed_cidrs.is_empty()
			|| self.token.is_some()
			|| (self.basic_user.is_some() && self.basic_password.is_some())
	}
}

impl std::fmt::Debug for OpsGuardConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OpsGuardConfig")
			.field("enabled", &self.enabled)
			.field("allowed_cidrs", &self.allowed_cidrs)
			.field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
			.field("basic_user", &self.basic_user)
			.field(
				"basic_password",
				&self.basic_password.as_ref().map(|_| "[REDACTED]"),
			)
			.field("real_ip_header", &self.real_ip_header)
			.finish()
	}
}

#[derive(Clone, Default, Deserialize)]
pub struct OpsGuardConfigLayer {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub allowed_cidrs: Option<Vec<String>>,
	#[serde(default)]
	pub token: Option<String>,
	#[serde(default)]
	pub basic_user: Option<String>,
	#[serde(default)]
	pub basic_password: Option<String>,
	#[serde(default)]
	pub real_ip_header: Option<String>,
}

impl std::fmt::Debug for OpsGuardConfigLayer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OpsGuardConfigLayer")
			.field("enabled", &self.enabled)
			.field("allowed_cidrs", &self.allowed_cidrs)
			.field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
			.field("basic_user", &self.basic_user)
			.field(
				"basic_password",
				&self.basic_password.as_ref().map(|_| "[REDACTED]"),
			)
			.field("real_ip_header", &self.real_ip_header)
			.finish()
	}
}

/// Split a CIDR list on commas, semicolons and whitespace.
pub fn split_cidrs(raw: &str) -> Vec<String> {
	raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
		.collect()
}

impl OpsGuardConfigLayer {
	pub fn merge(&mut self, other: OpsGuardConfigLayer) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.allowed_cidrs.is_some() {
			self.allowed_cidrs = other.allowed_cidrs;
		}
		if other.token.is_some() {
			self.token = other.token;
		}
		if other.basic_user.is_some() {
			self.basic_user = other.basic_user;
		}
		if other.basic_password.is_some() {
			self.basic_password = other.basic_password;
		}
		if other.real_ip_header.is_some() {
			self.real_ip_header = other.real_ip_header;
		}
	}

	/// The guard is on when explicitly enabled or when any credential is set.
	pub fn finalize(self) -> OpsGuardConfig {
		let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
		let mut config = OpsGuardConfig {
			enabled: false,
			allowed_cidrs: self
				.allowed_cidrs
				.unwrap_or_default()
				.iter()
				.flat_map(|entry| split_cidrs(entry))
				.collect(),
			token: non_empty(self.token),
			basic_user: non_empty(self.basic_user),
			basic_password: non_empty(self.basic_password),
			real_ip_header: non_empty(self.real_ip_header).map(|h| h.to_ascii_lowercase()),
		};
		config.enabled = self.enabled.unwrap_or_else(|| config.has_credentials());
		config
	}
}
