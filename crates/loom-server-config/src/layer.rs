// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{
	AuthzConfigLayer, DatabaseConfigLayer, EnvironmentConfigLayer, HttpConfigLayer,
	LoggingConfigLayer, OpsGuardConfigLayer, RoutingConfigLayer, WebhookReplayConfigLayer,
};

/// Server configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub http: Option<HttpConfigLayer>,
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
	#[serde(default)]
	pub environment: Option<EnvironmentConfigLayer>,
	#[serde(default)]
	pub authz: Option<AuthzConfigLayer>,
	#[serde(default)]
	pub routing: Option<RoutingConfigLayer>,
	#[serde(default)]
	pub ops_guard: Option<OpsGuardConfigLayer>,
	#[serde(default)]
	pub webhook_replay: Option<WebhookReplayConfigLayer>,
}

impl ServerConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_option(&mut self.http, other.http, HttpConfigLayer::merge);
		merge_option(
			&mut self.database,
			other.database,
			DatabaseConfigLayer::merge,
		);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		merge_option(
			&mut self.environment,
			other.environment,
			EnvironmentConfigLayer::merge,
		);
		merge_option(&mut self.authz, other.authz, AuthzConfigLayer::merge);
		merge_option(&mut self.routing, other.routing, RoutingConfigLayer::merge);
		merge_option(
			&mut self.ops_guard,
			other.ops_guard,
			OpsGuardConfigLayer::merge,
		);
		merge_option(
			&mut self.webhook_replay,
			other.webhook_replay,
			WebhookReplayConfigLayer::merge,
		);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}
