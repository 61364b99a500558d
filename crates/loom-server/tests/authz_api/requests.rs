// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tests for the policy change request workflow.

use axum::http::StatusCode;
use serde_json::{json, Value};

use super::support::{user_subject, TestApp, TestResponse};

const REQUESTS: &str = "/core/api/authz/requests";

fn grant_diff(app: &TestApp) -> Value {
	json!([{
		"op": "add",
		"row": {
			"type": "p",
			"subject": user_subject(&app.tenant, app.stranger),
			"domain": app.domain(),
			"object": "core.authz",
			"action": "read",
			"effect": "allow",
		}
	}])
}

async fn create(app: &TestApp, as_draft: bool) -> TestResponse {
	let response = app
		.post(
			REQUESTS,
			Some(app.admin),
			json!({
				"object": "core.authz",
				"action": "read",
				"reason": "grant read to a new operator",
				"diff": grant_diff(app),
				"as_draft": as_draft,
			}),
		)
		.await;
	response.assert_status(StatusCode::CREATED);
	response
}

fn id_of(response: &TestResponse) -> String {
	response.body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn create_get_and_list() {
	let app = TestApp::new().await;
	let created = create(&app, false).await;
	assert_eq!(created.body["status"], "pending_review");
	assert_eq!(created.body["base_policy_revision"], app.revision());
	assert_eq!(created.body["subject"], user_subject(&app.tenant, app.admin));
	assert_eq!(created.body["domain"], app.domain());
	let id = id_of(&created);

	let fetched = app.get(&format!("{REQUESTS}/{id}"), Some(app.viewer)).await;
	fetched.assert_status(StatusCode::OK);
	assert_eq!(fetched.body["id"], id.as_str());

	create(&app, true).await;
	let all = app.get(REQUESTS, Some(app.viewer)).await;
	all.assert_status(StatusCode::OK);
	assert_eq!(all.body["total"], 2);
	assert_eq!(all.body["limit"], 50);

	let pending = app
		.get(&format!("{REQUESTS}?status=pending_review"), Some(app.viewer))
		.await;
	assert_eq!(pending.body["total"], 1);
	assert_eq!(pending.body["data"][0]["id"], id.as_str());

	let both = app
		.get(&format!("{REQUESTS}?status=draft,pending_review"), Some(app.viewer))
		.await;
	assert_eq!(both.body["total"], 2);
}

#[tokio::test]
async fn unknown_status_filter_is_rejected() {
	let app = TestApp::new().await;
	let response = app.get(&format!("{REQUESTS}?status=open"), Some(app.admin)).await;
	response.assert_status(StatusCode::BAD_REQUEST);
	assert_eq!(response.code(), "AUTHZ_INVALID_QUERY");
}

#[tokio::test]
async fn create_validates_body() {
	let app = TestApp::new().await;

	let no_action = app
		.post(REQUESTS, Some(app.admin), json!({"object": "core.authz", "diff": grant_diff(&app)}))
		.await;
	no_action.assert_status(StatusCode::BAD_REQUEST);
	assert_eq!(no_action.code(), "AUTHZ_INVALID_BODY");

	let bad_diff = app
		.post(
			REQUESTS,
			Some(app.admin),
			json!({"object": "core.authz", "action": "read", "diff": {"op": "add"}}),
		)
		.await;
	bad_diff.assert_status(StatusCode::BAD_REQUEST);
	assert_eq!(bad_diff.code(), "AUTHZ_INVALID_DIFF");

	let stale = app
		.post(
			REQUESTS,
			Some(app.admin),
			json!({"object": "core.authz", "action": "read", "diff": grant_diff(&app), "base_revision": "old"}),
		)
		.await;
	stale.assert_status(StatusCode::CONFLICT);
	assert_eq!(stale.code(), "AUTHZ_BASE_REVISION_MISMATCH");
}

#[tokio::test]
async fn create_without_diff_consumes_stage() {
	let app = TestApp::new().await;
	let body = json!({"object": "core.authz", "action": "read"});

	let empty = app.post(REQUESTS, Some(app.admin), body.clone()).await;
	empty.assert_status(StatusCode::BAD_REQUEST);
	assert_eq!(empty.code(), "AUTHZ_STAGE_EMPTY");

	app.stage_policy("role:auditor", "core.audit", "read").await;
	let created = app.post(REQUESTS, Some(app.admin), body).await;
	created.assert_status(StatusCode::CREATED);
	assert_eq!(created.body["diff"][0]["op"], "add");
	assert_eq!(created.body["diff"][0]["row"]["object"], "core.audit");

	let stage = app.get("/core/api/authz/policies/stage", Some(app.admin)).await;
	assert_eq!(stage.body["total"], 0);
}

#[tokio::test]
async fn approve_apply_and_revert() {
	let app = TestApp::new().await;
	let id = id_of(&create(&app, false).await);

	let approved = app
		.post(&format!("{REQUESTS}/{id}/approve"), Some(app.admin), json!({}))
		.await;
	approved.assert_status(StatusCode::OK);
	assert_eq!(approved.body["status"], "approved");
	assert_eq!(approved.body["approver_id"], app.admin.to_string());

	let merged = app
		.post(&format!("{REQUESTS}/{id}/apply"), Some(app.admin), json!({}))
		.await;
	merged.assert_status(StatusCode::OK);
	assert_eq!(merged.body["status"], "merged");
	assert_eq!(merged.body["applied_policy_revision"], app.revision());
	assert_eq!(merged.body["applied_policy_snapshot"][0]["op"], "remove");
	assert!(merged.body["bot_lock"].is_null());

	app.get("/core/api/authz/policies", Some(app.stranger))
		.await
		.assert_status(StatusCode::OK);

	let revert = app
		.post(&format!("{REQUESTS}/{id}/revert"), Some(app.admin), json!({}))
		.await;
	revert.assert_status(StatusCode::CREATED);
	assert_eq!(revert.body["status"], "pending_review");
	assert_eq!(revert.body["diff"][0]["op"], "remove");
	let revert_id = id_of(&revert);

	app.post(&format!("{REQUESTS}/{revert_id}/approve"), Some(app.admin), json!({}))
		.await
		.assert_status(StatusCode::OK);
	app.post(&format!("{REQUESTS}/{revert_id}/apply"), Some(app.admin), json!({}))
		.await
		.assert_status(StatusCode::OK);

	app.get("/core/api/authz/policies", Some(app.stranger))
		.await
		.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn apply_requires_approval() {
	let app = TestApp::new().await;
	let id = id_of(&create(&app, false).await);

	let response = app
		.post(&format!("{REQUESTS}/{id}/apply"), Some(app.admin), json!({}))
		.await;
	response.assert_status(StatusCode::CONFLICT);
	assert_eq!(response.code(), "AUTHZ_INVALID_STATE");
}

#[tokio::test]
async fn draft_lifecycle_transitions() {
	let app = TestApp::new().await;
	let id = id_of(&create(&app, true).await);

	let early = app
		.post(&format!("{REQUESTS}/{id}/approve"), Some(app.admin), json!({}))
		.await;
	early.assert_status(StatusCode::CONFLICT);
	assert_eq!(early.code(), "AUTHZ_INVALID_STATE");
	assert_eq!(early.body["meta"]["from"], "draft");
	assert_eq!(early.body["meta"]["to"], "approved");

	let submitted = app
		.post(&format!("{REQUESTS}/{id}/submit"), Some(app.admin), json!({}))
		.await;
	submitted.assert_status(StatusCode::OK);
	assert_eq!(submitted.body["status"], "pending_review");

	let rejected = app
		.post(&format!("{REQUESTS}/{id}/reject"), Some(app.admin), json!({}))
		.await;
	rejected.assert_status(StatusCode::OK);
	assert_eq!(rejected.body["status"], "rejected");

	let cancel = app
		.post(&format!("{REQUESTS}/{id}/cancel"), Some(app.admin), json!({}))
		.await;
	cancel.assert_status(StatusCode::CONFLICT);

	let retry = app
		.post(&format!("{REQUESTS}/{id}/retry"), Some(app.admin), json!({}))
		.await;
	retry.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn trigger_bot_counts_attempts() {
	let app = TestApp::new().await;
	let id = id_of(&create(&app, false).await);

	let first = app
		.post(&format!("{REQUESTS}/{id}/trigger-bot?locker=job-1"), Some(app.admin), json!({}))
		.await;
	first.assert_status(StatusCode::OK);
	assert_eq!(first.body["bot_attempts"], 1);
	assert_eq!(first.body["bot_job_id"], "job-1");
	assert_eq!(first.body["status"], "pending_review");
}

#[tokio::test]
async fn viewer_cannot_approve_or_create() {
	let app = TestApp::new().await;
	let id = id_of(&create(&app, false).await);

	let approve = app
		.post(&format!("{REQUESTS}/{id}/approve"), Some(app.viewer), json!({}))
		.await;
	approve.assert_status(StatusCode::FORBIDDEN);
	assert_eq!(approve.body["action"], "approve");

	let created = app
		.post(
			REQUESTS,
			Some(app.viewer),
			json!({"object": "core.authz", "action": "read", "diff": grant_diff(&app)}),
		)
		.await;
	created.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn bad_and_unknown_ids() {
	let app = TestApp::new().await;

	let bad = app.get(&format!("{REQUESTS}/not-a-uuid"), Some(app.admin)).await;
	bad.assert_status(StatusCode::BAD_REQUEST);
	assert_eq!(bad.code(), "AUTHZ_INVALID_ID");

	let unknown = app
		.get(&format!("{REQUESTS}/{}", uuid::Uuid::new_v4()), Some(app.admin))
		.await;
	unknown.assert_status(StatusCode::NOT_FOUND);
	assert_eq!(unknown.code(), "AUTHZ_NOT_FOUND");
}
