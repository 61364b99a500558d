// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tests for GET /core/api/authz/debug.

use axum::http::StatusCode;

use super::support::{user_subject, TestApp};

#[tokio::test]
async fn debug_explains_allowed_decision() {
	let app = TestApp::new().await;
	let subject = user_subject(&app.tenant, app.viewer);
	let path = format!(
		"/core/api/authz/debug?subject={subject}&domain={}&object=core.authz&action=READ",
		app.domain()
	);
	let response = app.get(&path, Some(app.admin)).await;
	response.assert_status(StatusCode::OK);

	assert_eq!(response.body["allowed"], true);
	assert_eq!(response.body["mode"], "enforce");
	assert_eq!(response.body["revision"], app.revision());
	assert_eq!(response.body["request"]["subject"], subject);
	assert_eq!(response.body["request"]["action"], "read");
	assert_eq!(
		response.body["trace"]["matched_policy"],
		serde_json::json!(["p, role:authz-viewer, *, core.authz, read, allow"])
	);
}

#[tokio::test]
async fn debug_defaults_to_caller() {
	let app = TestApp::new().await;
	let response = app
		.get("/core/api/authz/debug?object=core.billing&action=read", Some(app.admin))
		.await;
	response.assert_status(StatusCode::OK);

	assert_eq!(response.body["allowed"], false);
	assert_eq!(response.body["request"]["subject"], user_subject(&app.tenant, app.admin));
	assert_eq!(response.body["request"]["domain"], app.domain());
	assert_eq!(response.body["trace"]["matched_policy"], serde_json::json!([]));
}

#[tokio::test]
async fn debug_collects_attributes() {
	let app = TestApp::new().await;
	let response = app
		.get(
			"/core/api/authz/debug?object=core.authz&action=read&attr.ip=10.0.0.1&attr.ip=10.0.0.2&attr.team=core",
			Some(app.admin),
		)
		.await;
	response.assert_status(StatusCode::OK);
	assert_eq!(response.body["attributes"]["ip"], "10.0.0.2");
	assert_eq!(response.body["attributes"]["team"], "core");
}

#[tokio::test]
async fn debug_requires_object_and_action() {
	let app = TestApp::new().await;
	let response = app
		.get("/core/api/authz/debug?object=core.authz", Some(app.admin))
		.await;
	response.assert_status(StatusCode::BAD_REQUEST);
	assert_eq!(response.code(), "AUTHZ_DEBUG_INVALID");
}

#[tokio::test]
async fn debug_needs_debug_capability() {
	let app = TestApp::new().await;
	let response = app
		.get("/core/api/authz/debug?object=core.authz&action=read", Some(app.viewer))
		.await;
	response.assert_status(StatusCode::FORBIDDEN);
	assert_eq!(response.body["action"], "debug");
}

#[tokio::test]
async fn debug_inspections_are_counted() {
	let app = TestApp::new().await;
	app.get("/core/api/authz/debug?object=core.authz&action=read", Some(app.admin))
		.await
		.assert_status(StatusCode::OK);

	let metrics = app.state.metrics.gather_metrics().unwrap();
	assert!(metrics.contains(r#"authz_debug_requests_total{mode="enforce",result="allowed"} 1"#));
}
