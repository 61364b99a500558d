// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Router-level behaviour of the middleware pack.

use axum::{
	body::Body,
	http::{header, Method, Request, StatusCode},
};

use super::support::{enforcing_config, read, TestApp, TENANT_HOST};

#[tokio::test]
async fn health_reports_revision_and_mode() {
	let app = TestApp::new().await;
	let request = Request::builder()
		.uri("/health")
		.body(Body::empty())
		.unwrap();
	let response = app.send(request).await;
	response.assert_status(StatusCode::OK);
	assert_eq!(response.body["status"], "ok");
	assert_eq!(response.body["mode"], "enforce");
	assert_eq!(response.body["revision"], app.revision());
}

#[tokio::test]
async fn prometheus_exposes_decision_counters() {
	let app = TestApp::new().await;
	app.get("/core/api/authz/policies", Some(app.admin)).await;

	let response = app.get("/debug/prometheus", None).await;
	response.assert_status(StatusCode::OK);
	assert!(response.headers[header::CONTENT_TYPE]
		.to_str()
		.unwrap()
		.starts_with("text/plain"));
	assert!(response
		.text
		.contains(r#"authz_decisions_total{mode="enforce",result="allowed"} 1"#));
}

#[tokio::test]
async fn openapi_document_is_served() {
	let app = TestApp::new().await;
	let response = app.get("/core/api/authz/openapi.json", None).await;
	response.assert_status(StatusCode::OK);
	assert!(response.body["paths"]["/core/api/authz/debug"].is_object());
}

#[tokio::test]
async fn unknown_api_route_gets_json_envelope() {
	let app = TestApp::new().await;
	let response = app.get("/core/api/authz/nothing-here", Some(app.admin)).await;
	response.assert_status(StatusCode::NOT_FOUND);
	assert_eq!(response.code(), "NOT_FOUND");
	assert_eq!(response.body["meta"]["path"], "/core/api/authz/nothing-here");
}

#[tokio::test]
async fn wrong_method_gets_405_envelope() {
	let app = TestApp::new().await;
	let request = app
		.builder(Method::PUT, "/core/api/authz/policies", Some(app.admin))
		.body(Body::empty())
		.unwrap();
	let response = app.send(request).await;
	response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
	assert_eq!(response.code(), "METHOD_NOT_ALLOWED");
}

#[tokio::test]
async fn unknown_host_is_not_found() {
	let app = TestApp::new().await;
	let request = Request::builder()
		.uri("/core/api/authz/policies")
		.header(header::HOST, "elsewhere.test")
		.header(app.state.config.authz.user_header.as_str(), app.admin.to_string())
		.body(Body::empty())
		.unwrap();
	let response = app.send(request).await;
	response.assert_status(StatusCode::NOT_FOUND);
	assert_eq!(response.code(), "NOT_FOUND");
}

#[tokio::test]
async fn request_id_is_propagated() {
	let app = TestApp::new().await;
	let request = app
		.builder(Method::GET, "/core/api/authz/policies", Some(app.admin))
		.header("x-request-id", "req-abc-123")
		.body(Body::empty())
		.unwrap();
	let response = app.send(request).await;
	assert_eq!(response.headers["x-request-id"], "req-abc-123");

	let generated = app.get("/core/api/authz/policies", Some(app.admin)).await;
	assert!(!generated.headers["x-request-id"].is_empty());
}

#[tokio::test]
async fn handler_panic_is_recovered() {
	let app = TestApp::new().await;
	let request = app
		.builder(Method::GET, "/__test__/panic", None)
		.header("x-request-id", "req-panic")
		.body(Body::empty())
		.unwrap();
	let response = app.send(request).await;
	response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
	assert_eq!(response.headers["x-request-id"], "req-panic");
}

#[tokio::test]
async fn test_routes_hidden_when_disabled() {
	let mut config = enforcing_config();
	config.environment.enable_test_endpoints = false;
	let app = TestApp::with_config(config).await;

	let response = app.get("/__test__/panic", None).await;
	response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ops_guard_requires_token_in_production() {
	let mut config = enforcing_config();
	config.environment.name = "production".to_string();
	config.ops_guard.enabled = true;
	config.ops_guard.token = Some("s3cret".to_string());
	let app = TestApp::with_config(config).await;

	let denied = app.get("/debug/prometheus", None).await;
	denied.assert_status(StatusCode::NOT_FOUND);

	let request = Request::builder()
		.uri("/debug/prometheus")
		.header(header::HOST, TENANT_HOST)
		.header("x-ops-token", "s3cret")
		.body(Body::empty())
		.unwrap();
	let allowed = read(
		tower::ServiceExt::oneshot(app.router.clone(), request)
			.await
			.unwrap(),
	)
	.await;
	allowed.assert_status(StatusCode::OK);

	let bearer = app
		.send(
			app.builder(Method::GET, "/debug/prometheus", None)
				.header(header::AUTHORIZATION, "Bearer s3cret")
				.body(Body::empty())
				.unwrap(),
		)
		.await;
	bearer.assert_status(StatusCode::OK);
}
