// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use axum::{
	extract::{Request, State},
	middleware::Next,
	response::Response,
};
use loom_common_routing::{has_path_prefix_on_boundary, Classifier, RouteClass};
use loom_server_config::EnvironmentConfig;
use tracing::debug;

use crate::api_response::ApiError;

const PLAYGROUND_PREFIX: &str = "/playground";

/// Classifier plus the environment switches for hidden route classes.
#[derive(Debug)]
pub struct RouteGate {
	classifier: Arc<Classifier>,
	dev_endpoints: bool,
	graphql_playground: bool,
	test_endpoints: bool,
}

impl RouteGate {
	pub fn new(classifier: Arc<Classifier>, environment: &EnvironmentConfig) -> Self {
		Self {
			classifier,
			dev_endpoints: environment.enable_dev_endpoints,
			graphql_playground: environment.enable_graphql_playground,
			test_endpoints: environment.enable_test_endpoints,
		}
	}

	pub fn classify(&self, path: &str) -> RouteClass {
		self.classifier.classify_path(path)
	}

	pub fn is_hidden(&self, class: RouteClass, path: &str) -> bool {
		match class {
			RouteClass::DevOnly => {
				let playground =
					self.graphql_playground && has_path_prefix_on_boundary(path, PLAYGROUND_PREFIX);
				!(self.dev_endpoints || playground)
			}
			RouteClass::Test => !self.test_endpoints,
			_ => false,
		}
	}
}

/// Attach the route class to the request extensions.
pub async fn classify(State(gate): State<Arc<RouteGate>>, mut req: Request, next: Next) -> Response {
	let class = gate.classify(req.uri().path());
	req.extensions_mut().insert(class);
	next.run(req).await
}

/// Answer 404 for dev-only and test routes whose switch is off.
pub async fn hide_disabled_routes(
	State(gate): State<Arc<RouteGate>>,
	req: Request,
	next: Next,
) -> Response {
	let path = req.uri().path();
	let class = req
		.extensions()
		.get::<RouteClass>()
		.copied()
		.unwrap_or_else(|| gate.classify(path));
	if gate.is_hidden(class, path) {
		debug!(path = %path, route_class = %class, "hidden route requested");
		return ApiError::not_found(path).into_class_response(class);
	}
	next.run(req).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_common_routing::AllowlistRule;

	fn gate(environment: EnvironmentConfig) -> RouteGate {
		let classifier = Classifier::new(vec![
			AllowlistRule::new("/_dev", RouteClass::DevOnly),
			AllowlistRule::new("/playground", RouteClass::DevOnly),
			AllowlistRule::new("/__test__", RouteClass::Test),
		]);
		RouteGate::new(Arc::new(classifier), &environment)
	}

	#[test]
	fn test_hidden_by_default() {
		let gate = gate(EnvironmentConfig::default());
		assert!(gate.is_hidden(RouteClass::DevOnly, "/_dev/info"));
		assert!(gate.is_hidden(RouteClass::Test, "/__test__/panic"));
		assert!(!gate.is_hidden(RouteClass::Ops, "/health"));
	}

	#[test]
	fn test_playground_switch_only_opens_playground() {
		let gate = gate(EnvironmentConfig {
			enable_graphql_playground: true,
			..Default::default()
		});
		assert!(!gate.is_hidden(RouteClass::DevOnly, "/playground"));
		assert!(gate.is_hidden(RouteClass::DevOnly, "/_dev/info"));
	}

	#[test]
	fn test_switches_open_classes() {
		let gate = gate(EnvironmentConfig {
			enable_dev_endpoints: true,
			enable_test_endpoints: true,
			..Default::default()
		});
		assert!(!gate.is_hidden(RouteClass::DevOnly, "/_dev/info"));
		assert!(!gate.is_hidden(RouteClass::Test, "/__test__/panic"));
	}
}
