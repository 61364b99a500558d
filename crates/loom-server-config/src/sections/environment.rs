// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deployment environment and feature switches.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
	pub name: String,
	pub enable_dev_endpoints: bool,
	pub enable_graphql_playground: bool,
	pub enable_test_endpoints: bool,
}

impl EnvironmentConfig {
	pub fn is_production(&self) -> bool {
		self.name.eq_ignore_ascii_case("production")
	}
}

impl Default for EnvironmentConfig {
	fn default() -> Self {
		EnvironmentConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentConfigLayer {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub enable_dev_endpoints: Option<bool>,
	#[serde(default)]
	pub enable_graphql_playground: Option<bool>,
	#[serde(default)]
	pub enable_test_endpoints: Option<bool>,
}

impl EnvironmentConfigLayer {
	pub fn merge(&mut self, other: EnvironmentConfigLayer) {
		if other.name.is_some() {
			self.name = other.name;
		}
		if other.enable_dev_endpoints.is_some() {
			self.enable_dev_endpoints = other.enable_dev_endpoints;
		}
		if other.enable_graphql_playground.is_some() {
			self.enable_graphql_playground = other.enable_graphql_playground;
		}
		if other.enable_test_endpoints.is_some() {
			self.enable_test_endpoints = other.enable_test_endpoints;
		}
	}

	pub fn finalize(self) -> EnvironmentConfig {
		EnvironmentConfig {
			name: self
				.name
				.map(|n| n.trim().to_ascii_lowercase())
				.filter(|n| !n.is_empty())
				.unwrap_or_else(|| "development".to_string()),
			enable_dev_endpoints: self.enable_dev_endpoints.unwrap_or(false),
			enable_graphql_playground: self.enable_graphql_playground.unwrap_or(false),
			enable_test_endpoints: self.enable_test_endpoints.unwrap_or(false),
		}
	}
}
