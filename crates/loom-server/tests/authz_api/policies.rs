// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tests for GET /core/api/authz/policies.

use axum::http::StatusCode;

use super::support::TestApp;

#[tokio::test]
async fn admin_lists_active_policies() {
	let app = TestApp::new().await;
	let response = app.get("/core/api/authz/policies", Some(app.admin)).await;
	response.assert_status(StatusCode::OK);

	assert_eq!(response.body["total"], 4);
	assert_eq!(response.body["page"], 1);
	assert_eq!(response.body["limit"], 50);
	assert_eq!(response.body["revision"], app.revision());
}

#[tokio::test]
async fn viewer_can_read_policies() {
	let app = TestApp::new().await;
	app.get("/core/api/authz/policies", Some(app.viewer))
		.await
		.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn type_filter_and_pagination() {
	let app = TestApp::new().await;

	let groupings = app.get("/core/api/authz/policies?type=g", Some(app.admin)).await;
	groupings.assert_status(StatusCode::OK);
	assert_eq!(groupings.body["total"], 2);

	let page = app
		.get("/core/api/authz/policies?limit=3&page=2", Some(app.admin))
		.await;
	page.assert_status(StatusCode::OK);
	assert_eq!(page.body["total"], 4);
	assert_eq!(page.body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn descending_sort_by_object() {
	let app = TestApp::new().await;
	let response = app
		.get("/core/api/authz/policies?type=p&sort=-object", Some(app.admin))
		.await;
	response.assert_status(StatusCode::OK);
	let objects: Vec<&str> = response.body["data"]
		.as_array()
		.unwrap()
		.iter()
		.map(|r| r["object"].as_str().unwrap())
		.collect();
	assert_eq!(objects.len(), 2);
	assert!(objects.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn unknown_sort_field_is_rejected() {
	let app = TestApp::new().await;
	let response = app
		.get("/core/api/authz/policies?sort=colour", Some(app.admin))
		.await;
	response.assert_status(StatusCode::BAD_REQUEST);
	assert_eq!(response.code(), "AUTHZ_INVALID_QUERY");
}

#[tokio::test]
async fn missing_user_is_unauthorized() {
	let app = TestApp::new().await;
	let response = app.get("/core/api/authz/policies", None).await;
	response.assert_status(StatusCode::UNAUTHORIZED);
	assert_eq!(response.code(), "AUTHZ_NO_USER");
}

#[tokio::test]
async fn ungranted_user_gets_forbidden_payload() {
	let app = TestApp::new().await;
	let response = app.get("/core/api/authz/policies", Some(app.stranger)).await;
	response.assert_status(StatusCode::FORBIDDEN);

	assert_eq!(response.code(), "AUTHZ_FORBIDDEN");
	assert_eq!(response.body["object"], "core.authz");
	assert_eq!(response.body["action"], "read");
	assert_eq!(response.body["domain"], app.domain());
	assert_eq!(response.body["request_url"], "/core/api/authz/requests");
	let missing = response.body["missing_policies"].as_array().unwrap();
	assert!(!missing.is_empty());
	assert!(response.body["debug_url"]
		.as_str()
		.unwrap()
		.starts_with("/core/api/authz/debug?"));
}

#[tokio::test]
async fn shadow_mode_lets_ungranted_user_through() {
	let mut config = super::support::enforcing_config();
	config.authz.mode = loom_authz_core::Mode::Shadow;
	let app = TestApp::with_config(config).await;

	app.get("/core/api/authz/policies", Some(app.stranger))
		.await
		.assert_status(StatusCode::OK);
}
