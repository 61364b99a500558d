// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

/// Closed set of route classes an HTTP path can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
	Ui,
	Authn,
	InternalApi,
	PublicApi,
	Webhook,
	Ops,
	Test,
	Static,
	Websocket,
	DevOnly,
}

impl RouteClass {
	pub const ALL: [RouteClass; 10] = [
		RouteClass::Ui,
		RouteClass::Authn,
		RouteClass::InternalApi,
		RouteClass::PublicApi,
		RouteClass::Webhook,
		RouteClass::Ops,
		RouteClass::Test,
		RouteClass::Static,
		RouteClass::Websocket,
		RouteClass::DevOnly,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			RouteClass::Ui => "ui",
			RouteClass::Authn => "authn",
			RouteClass::InternalApi => "internal_api",
			RouteClass::PublicApi => "public_api",
			RouteClass::Webhook => "webhook",
			RouteClass::Ops => "ops",
			RouteClass::Test => "test",
			RouteClass::Static => "static",
			RouteClass::Websocket => "websocket",
			RouteClass::DevOnly => "dev_only",
		}
	}

	/// Classes whose failures are rendered as JSON envelopes rather than pages.
	pub fn is_api(&self) -> bool {
		matches!(
			self,
			RouteClass::InternalApi | RouteClass::PublicApi | RouteClass::Webhook
		)
	}
}

impl std::fmt::Display for RouteClass {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for RouteClass {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		RouteClass::ALL
			.iter()
			.copied()
			.find(|class| class.as_str() == s)
			.ok_or_else(|| format!("unknown route class: {s}"))
	}
}
