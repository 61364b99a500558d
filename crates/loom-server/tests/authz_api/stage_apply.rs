// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tests for staging and applying policy changes.

use axum::{
	body::Body,
	http::{header, Method, StatusCode},
};
use serde_json::json;

use super::support::{user_subject, TestApp};

const STAGE: &str = "/core/api/authz/policies/stage";
const APPLY: &str = "/core/api/authz/policies/apply";

#[tokio::test]
async fn staged_entries_are_listed_per_user() {
	let app = TestApp::new().await;
	let staged = app.stage_policy("role:auditor", "core.audit", "read").await;
	assert_eq!(staged.body["created_ids"].as_array().unwrap().len(), 1);
	assert_eq!(staged.body["total"], 1);
	assert_eq!(staged.body["data"][0]["stage_kind"], "add");
	assert_eq!(staged.body["data"][0]["object"], "core.audit");

	let mine = app.get(STAGE, Some(app.admin)).await;
	mine.assert_status(StatusCode::OK);
	assert_eq!(mine.body["total"], 1);

	let theirs = app.get(STAGE, Some(app.viewer)).await;
	theirs.assert_status(StatusCode::OK);
	assert_eq!(theirs.body["total"], 0);
}

#[tokio::test]
async fn stage_accepts_arrays_and_forms() {
	let app = TestApp::new().await;
	let domain = app.domain();
	let many = app
		.post(
			STAGE,
			Some(app.admin),
			json!([
				{"type": "p", "subject": "role:a", "domain": domain, "object": "core.a", "action": "read", "effect": "allow"},
				{"type": "p", "subject": "role:b", "domain": domain, "object": "core.b", "action": "read", "effect": "deny"},
			]),
		)
		.await;
	many.assert_status(StatusCode::CREATED);
	assert_eq!(many.body["created_ids"].as_array().unwrap().len(), 2);

	let form = format!("type=p&subject=role%3Ac&domain={domain}&object=core.c&action=write&effect=allow");
	let request = app
		.builder(Method::POST, STAGE, Some(app.admin))
		.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
		.body(Body::from(form))
		.unwrap();
	let response = app.send(request).await;
	response.assert_status(StatusCode::CREATED);
	assert_eq!(response.body["total"], 3);
}

#[tokio::test]
async fn stage_rejects_incomplete_payload() {
	let app = TestApp::new().await;
	let response = app
		.post(
			STAGE,
			Some(app.admin),
			json!({"type": "p", "subject": "role:a", "domain": app.domain(), "object": "core.a", "action": "read"}),
		)
		.await;
	response.assert_status(StatusCode::BAD_REQUEST);
	assert_eq!(response.code(), "AUTHZ_STAGE_ERROR");
}

#[tokio::test]
async fn viewer_cannot_stage() {
	let app = TestApp::new().await;
	let response = app
		.post(
			STAGE,
			Some(app.viewer),
			json!({"type": "p", "subject": "role:a", "domain": app.domain(), "object": "core.a", "action": "read", "effect": "allow"}),
		)
		.await;
	response.assert_status(StatusCode::FORBIDDEN);
	assert_eq!(response.body["action"], "manage");
}

#[tokio::test]
async fn delete_stage_by_id_and_clear() {
	let app = TestApp::new().await;
	let first = app.stage_policy("role:a", "core.a", "read").await;
	app.stage_policy("role:b", "core.b", "read").await;
	let id = first.body["created_ids"][0].as_str().unwrap().to_string();

	let after_delete = app.delete(&format!("{STAGE}?id={id}"), Some(app.admin)).await;
	after_delete.assert_status(StatusCode::OK);
	assert_eq!(after_delete.body["total"], 1);

	let missing = app.delete(&format!("{STAGE}?id={id}"), Some(app.admin)).await;
	missing.assert_status(StatusCode::NOT_FOUND);

	let cleared = app.delete(STAGE, Some(app.admin)).await;
	cleared.assert_status(StatusCode::OK);
	assert_eq!(cleared.body["total"], 0);
}

#[tokio::test]
async fn apply_commits_stage_and_reloads_engine() {
	let app = TestApp::new().await;
	let stranger = user_subject(&app.tenant, app.stranger);
	app.stage_policy(&stranger, "core.authz", "read").await;

	app.get("/core/api/authz/policies", Some(app.stranger))
		.await
		.assert_status(StatusCode::FORBIDDEN);

	let base = app.revision();
	let applied = app
		.post(APPLY, Some(app.admin), json!({"base_revision": base}))
		.await;
	applied.assert_status(StatusCode::OK);
	assert_eq!(applied.body["base_revision"], base);
	assert_ne!(applied.body["revision"], base);
	assert_eq!(applied.body["added"].as_array().unwrap().len(), 1);
	assert_eq!(applied.body["removed"].as_array().unwrap().len(), 0);
	assert_eq!(app.revision(), applied.body["revision"].as_str().unwrap());

	let stage = app.get(STAGE, Some(app.admin)).await;
	assert_eq!(stage.body["total"], 0);

	let listed = app.get("/core/api/authz/policies", Some(app.stranger)).await;
	listed.assert_status(StatusCode::OK);
	assert_eq!(listed.body["total"], 5);
}

#[tokio::test]
async fn apply_with_stale_revision_conflicts() {
	let app = TestApp::new().await;
	app.stage_policy("role:a", "core.a", "read").await;

	let response = app
		.post(APPLY, Some(app.admin), json!({"base_revision": "stale"}))
		.await;
	response.assert_status(StatusCode::CONFLICT);
	assert_eq!(response.code(), "AUTHZ_BASE_REVISION_MISMATCH");
	assert_eq!(response.body["meta"]["base_revision"], app.revision());
	assert_eq!(
		response.headers.get("x-authz-base-revision").unwrap(),
		app.revision().as_str()
	);

	let stage = app.get(STAGE, Some(app.admin)).await;
	assert_eq!(stage.body["total"], 1);
}

#[tokio::test]
async fn apply_requires_base_revision_and_stage() {
	let app = TestApp::new().await;

	let empty = app
		.post(APPLY, Some(app.admin), json!({"base_revision": app.revision()}))
		.await;
	empty.assert_status(StatusCode::BAD_REQUEST);
	assert_eq!(empty.code(), "AUTHZ_STAGE_EMPTY");

	app.stage_policy("role:a", "core.a", "read").await;
	let missing = app.post(APPLY, Some(app.admin), json!({})).await;
	missing.assert_status(StatusCode::BAD_REQUEST);
	assert_eq!(missing.code(), "AUTHZ_INVALID_BODY");
}

#[tokio::test]
async fn apply_explicit_removal() {
	let app = TestApp::new().await;
	let viewer_row = json!({
		"type": "p",
		"subject": "role:authz-viewer",
		"domain": "*",
		"object": "core.authz",
		"action": "read",
		"effect": "allow",
	});
	let applied = app
		.post(
			APPLY,
			Some(app.admin),
			json!({"base_revision": app.revision(), "changes": [{"op": "remove", "row": viewer_row}]}),
		)
		.await;
	applied.assert_status(StatusCode::OK);
	assert_eq!(applied.body["removed"].as_array().unwrap().len(), 1);

	app.get("/core/api/authz/policies", Some(app.viewer))
		.await
		.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn apply_is_rate_limited() {
	let mut config = super::support::enforcing_config();
	config.authz.rate_limit_per_minute = 1;
	let app = TestApp::with_config(config).await;

	app.post(APPLY, Some(app.admin), json!({"base_revision": app.revision()}))
		.await;
	let limited = app
		.post(APPLY, Some(app.admin), json!({"base_revision": app.revision()}))
		.await;
	limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
	assert_eq!(limited.code(), "AUTHZ_RATE_LIMITED");
	assert!(limited.headers.contains_key("retry-after"));
}
