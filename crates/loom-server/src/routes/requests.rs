// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Policy change request (draft) handlers.

use axum::{
	extract::{rejection::QueryRejection, FromRequest, Path, Query, Request, State},
	http::StatusCode,
	response::IntoResponse,
	Json,
};
use loom_authz_core::StagedEntry;
use loom_server_authz::{CreateDraftParams, ListDraftsParams, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use loom_server_db::{PolicyChangeRequest, PolicyDraftStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
	api::AppState,
	api_response::{ApiError, ErrorEnvelope},
	context::RequestCtx,
};

const AUTHZ_OBJECT: &str = "core.authz";

#[derive(Debug, Serialize, ToSchema)]
pub struct DraftListResponse {
	pub data: Vec<PolicyChangeRequest>,
	pub total: i64,
	pub limit: i64,
	pub offset: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateRequestBody {
	#[serde(default)]
	pub subject: String,
	#[serde(default)]
	pub domain: String,
	#[serde(default)]
	pub object: String,
	#[serde(default)]
	pub action: String,
	#[serde(default)]
	pub reason: String,
	/// JSON array of `{op, row}`; when absent the caller's stage is used.
	#[serde(default)]
	#[schema(value_type = Option<Object>)]
	pub diff: Option<Value>,
	#[serde(default)]
	pub base_revision: Option<String>,
	/// Create in `draft` instead of `pending_review`.
	#[serde(default)]
	pub as_draft: bool,
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
	Uuid::parse_str(raw.trim())
		.map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "AUTHZ_INVALID_ID", "invalid request id"))
}

fn parse_i64(raw: &str, name: &str) -> Result<i64, ApiError> {
	raw.trim()
		.parse()
		.map_err(|_| ApiError::invalid_query(format!("{name} must be numeric")))
}

fn parse_user(raw: &str, name: &str) -> Result<Uuid, ApiError> {
	Uuid::parse_str(raw.trim()).map_err(|_| ApiError::invalid_query(format!("{name} must be a uuid")))
}

/// Build list parameters from raw query pairs; `status` may repeat or hold a
/// comma separated list.
fn list_params(pairs: &[(String, String)]) -> Result<ListDraftsParams, ApiError> {
	let mut params = ListDraftsParams::default();
	for (key, value) in pairs {
		let value = value.trim();
		if value.is_empty() {
			continue;
		}
		match key.as_str() {
			"status" => {
				for status in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
					let status: PolicyDraftStatus = status.parse().map_err(ApiError::invalid_query)?;
					params.statuses.push(status);
				}
			}
			"requester_id" => params.requester_id = Some(parse_user(value, "requester_id")?),
			"approver_id" => params.approver_id = Some(parse_user(value, "approver_id")?),
			"subject" => params.subject = Some(value.to_string()),
			"domain" => params.domain = Some(value.to_string()),
			"limit" => params.limit = parse_i64(value, "limit")?,
			"offset" => params.offset = parse_i64(value, "offset")?,
			"sort" => params.sort_asc = value.eq_ignore_ascii_case("asc"),
			_ => {}
		}
	}
	Ok(params)
}

/// Lock owner for bot-driven endpoints: explicit, else derived from the request id.
fn locker_for(ctx: &RequestCtx, explicit: Option<&str>) -> String {
	match explicit.map(str::trim).filter(|l| !l.is_empty()) {
		Some(locker) => locker.to_string(),
		None if !ctx.request_id.is_empty() => format!("api:{}", ctx.request_id),
		None => ctx.subject(),
	}
}

#[utoipa::path(
    get,
    path = "/core/api/authz/requests",
    params(
        ("status" = Option<String>, Query, description = "Status filter; repeatable or comma separated"),
        ("subject" = Option<String>, Query, description = "Case-insensitive subject substring"),
        ("domain" = Option<String>, Query, description = "Exact domain"),
        ("limit" = Option<i64>, Query, description = "Page size, default 50, max 500"),
        ("offset" = Option<i64>, Query, description = "Rows to skip"),
        ("sort" = Option<String>, Query, description = "`asc` for oldest first")
    ),
    responses(
        (status = 200, description = "Page of change requests", body = DraftListResponse),
        (status = 400, description = "Invalid query", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// GET /core/api/authz/requests - List change requests for the tenant.
pub async fn list_requests(
	State(state): State<AppState>,
	ctx: RequestCtx,
	query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<DraftListResponse>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "read")?;
	let tenant_id = ctx.require_tenant()?;
	let Query(pairs) = query.map_err(|e| ApiError::invalid_query(e.body_text()))?;
	let params = list_params(&pairs)?;
	let offset = params.offset.max(0);
	let limit = match params.limit {
		l if l <= 0 => DEFAULT_LIST_LIMIT,
		l => l.min(MAX_LIST_LIMIT),
	};

	let (data, total) = state.drafts.list(tenant_id, params).await?;
	Ok(Json(DraftListResponse {
		data,
		total,
		limit,
		offset,
	}))
}

#[utoipa::path(
    get,
    path = "/core/api/authz/requests/{id}",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Change request", body = PolicyChangeRequest),
        (status = 404, description = "Not found", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// GET /core/api/authz/requests/{id}
pub async fn get_request(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Path(id): Path<String>,
) -> Result<Json<PolicyChangeRequest>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "read")?;
	let tenant_id = ctx.require_tenant()?;
	let draft = state.drafts.get(tenant_id, parse_id(&id)?).await?;
	Ok(Json(draft))
}

fn stage_diff(entries: &[StagedEntry]) -> Result<Value, ApiError> {
	let changes: Vec<_> = entries.iter().map(StagedEntry::to_change).collect();
	serde_json::to_value(changes).map_err(|e| ApiError::invalid_body(e.to_string()))
}

#[utoipa::path(
    post,
    path = "/core/api/authz/requests",
    request_body = CreateRequestBody,
    responses(
        (status = 201, description = "Change request created", body = PolicyChangeRequest),
        (status = 400, description = "Invalid body, diff or empty stage", body = ErrorEnvelope),
        (status = 409, description = "Base revision mismatch", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// POST /core/api/authz/requests - Open a change request.
///
/// Without a `diff` the caller's staged entries for the domain become the
/// diff and are removed from the stage once the request exists.
pub async fn create_request(
	State(state): State<AppState>,
	ctx: RequestCtx,
	req: Request,
) -> Result<impl IntoResponse, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "manage")?;
	let tenant_id = ctx.require_tenant()?;
	let requester_id = ctx.require_user()?;
	let Json(body) = Json::<CreateRequestBody>::from_request(req, &state)
		.await
		.map_err(|e| ApiError::invalid_body(e.body_text()))?;

	if body.object.trim().is_empty() {
		return Err(ApiError::invalid_body("object is required"));
	}
	if body.action.trim().is_empty() {
		return Err(ApiError::invalid_body("action is required"));
	}

	let mut consumed: Vec<Uuid> = Vec::new();
	let diff = match body.diff {
		Some(diff) if !diff.is_null() => diff,
		_ => {
			let key = ctx.stage_key()?;
			let staged = state.stage.list(key, "", body.domain.trim());
			if staged.is_empty() {
				return Err(ApiError::new(
					StatusCode::BAD_REQUEST,
					"AUTHZ_STAGE_EMPTY",
					"no staged changes to submit",
				));
			}
			consumed = staged.iter().map(|e| e.id).collect();
			stage_diff(&staged)?
		}
	};

	let draft = state
		.drafts
		.create(CreateDraftParams {
			tenant_id,
			requester_id,
			subject: body.subject,
			domain: body.domain,
			object: body.object,
			action: body.action,
			reason: body.reason,
			diff,
			base_revision: body.base_revision.filter(|r| !r.trim().is_empty()),
			as_draft: body.as_draft,
		})
		.await?;

	if !consumed.is_empty() {
		state.stage.discard(ctx.stage_key()?, &consumed);
		debug!(draft_id = %draft.id, entries = consumed.len(), "stage consumed by change request");
	}
	info!(request_id = %ctx.request_id, draft_id = %draft.id, status = %draft.status, "change request created");
	Ok((StatusCode::CREATED, Json(draft)))
}

#[utoipa::path(
    post,
    path = "/core/api/authz/requests/{id}/approve",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Updated change request", body = PolicyChangeRequest),
        (status = 404, description = "Not found", body = ErrorEnvelope),
        (status = 409, description = "Invalid status transition", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// POST /core/api/authz/requests/{id}/approve
pub async fn approve_request(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Path(raw_id): Path<String>,
) -> Result<Json<PolicyChangeRequest>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "approve")?;
	let tenant_id = ctx.require_tenant()?;
	let id = parse_id(&raw_id)?;
	let approver_id = ctx.require_user()?;
	Ok(Json(state.drafts.approve(tenant_id, id, approver_id).await?))
}

#[utoipa::path(
    post,
    path = "/core/api/authz/requests/{id}/reject",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Updated change request", body = PolicyChangeRequest),
        (status = 404, description = "Not found", body = ErrorEnvelope),
        (status = 409, description = "Invalid status transition", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// POST /core/api/authz/requests/{id}/reject
pub async fn reject_request(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Path(raw_id): Path<String>,
) -> Result<Json<PolicyChangeRequest>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "approve")?;
	let tenant_id = ctx.require_tenant()?;
	let id = parse_id(&raw_id)?;
	let approver_id = ctx.require_user()?;
	Ok(Json(state.drafts.reject(tenant_id, id, approver_id).await?))
}

#[utoipa::path(
    post,
    path = "/core/api/authz/requests/{id}/cancel",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Updated change request", body = PolicyChangeRequest),
        (status = 404, description = "Not found", body = ErrorEnvelope),
        (status = 409, description = "Invalid status transition", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// POST /core/api/authz/requests/{id}/cancel
pub async fn cancel_request(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Path(raw_id): Path<String>,
) -> Result<Json<PolicyChangeRequest>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "manage")?;
	let tenant_id = ctx.require_tenant()?;
	let id = parse_id(&raw_id)?;
	Ok(Json(state.drafts.cancel(tenant_id, id).await?))
}

#[utoipa::path(
    post,
    path = "/core/api/authz/requests/{id}/submit",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Updated change request", body = PolicyChangeRequest),
        (status = 404, description = "Not found", body = ErrorEnvelope),
        (status = 409, description = "Invalid status transition", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// POST /core/api/authz/requests/{id}/submit - Move a draft to review.
pub async fn submit_request(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Path(raw_id): Path<String>,
) -> Result<Json<PolicyChangeRequest>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "manage")?;
	let tenant_id = ctx.require_tenant()?;
	let id = parse_id(&raw_id)?;
	Ok(Json(state.drafts.submit(tenant_id, id).await?))
}

#[utoipa::path(
    post,
    path = "/core/api/authz/requests/{id}/retry",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Updated change request", body = PolicyChangeRequest),
        (status = 404, description = "Not found", body = ErrorEnvelope),
        (status = 409, description = "Invalid status transition", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// POST /core/api/authz/requests/{id}/retry - Send a failed request back to review.
pub async fn retry_request(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Path(raw_id): Path<String>,
) -> Result<Json<PolicyChangeRequest>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "manage")?;
	let tenant_id = ctx.require_tenant()?;
	let id = parse_id(&raw_id)?;
	Ok(Json(state.drafts.retry(tenant_id, id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct LockerQuery {
	pub locker: Option<String>,
}

#[utoipa::path(
    post,
    path = "/core/api/authz/requests/{id}/trigger-bot",
    params(
        ("id" = String, Path, description = "Change request id"),
        ("locker" = Option<String>, Query, description = "Bot job identifier")
    ),
    responses(
        (status = 200, description = "Bot attempt recorded", body = PolicyChangeRequest),
        (status = 404, description = "Not found", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// POST /core/api/authz/requests/{id}/trigger-bot - Record a bot attempt.
pub async fn trigger_bot_request(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Path(raw_id): Path<String>,
	Query(query): Query<LockerQuery>,
) -> Result<Json<PolicyChangeRequest>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "approve")?;
	let tenant_id = ctx.require_tenant()?;
	let id = parse_id(&raw_id)?;
	let locker = locker_for(&ctx, query.locker.as_deref());
	let draft = state.drafts.trigger_bot(tenant_id, id, &locker).await?;
	Ok(Json(draft))
}

#[utoipa::path(
    post,
    path = "/core/api/authz/requests/{id}/revert",
    params(("id" = String, Path, description = "Merged change request to revert")),
    responses(
        (status = 201, description = "Revert request created", body = PolicyChangeRequest),
        (status = 409, description = "Source has no applied snapshot", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// POST /core/api/authz/requests/{id}/revert - Open a request undoing a merge.
pub async fn revert_request(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "manage")?;
	let tenant_id = ctx.require_tenant()?;
	let requester_id = ctx.require_user()?;
	let draft = state
		.drafts
		.revert(tenant_id, parse_id(&raw_id)?, requester_id)
		.await?;
	Ok((StatusCode::CREATED, Json(draft)))
}

#[utoipa::path(
    post,
    path = "/core/api/authz/requests/{id}/apply",
    params(
        ("id" = String, Path, description = "Approved change request"),
        ("locker" = Option<String>, Query, description = "Bot lock owner")
    ),
    responses(
        (status = 200, description = "Request merged", body = PolicyChangeRequest),
        (status = 409, description = "Not approved or revision mismatch", body = ErrorEnvelope),
        (status = 423, description = "Locked by another worker", body = ErrorEnvelope)
    ),
    tag = "authz-requests"
)]
/// POST /core/api/authz/requests/{id}/apply - Merge an approved request.
pub async fn apply_request(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Path(raw_id): Path<String>,
	Query(query): Query<LockerQuery>,
) -> Result<Json<PolicyChangeRequest>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "approve")?;
	let tenant_id = ctx.require_tenant()?;
	let id = parse_id(&raw_id)?;
	let locker = locker_for(&ctx, query.locker.as_deref());
	let cancel = state.shutdown.child_token();
	let draft = state.apply.apply_draft(&cancel, tenant_id, id, &locker).await?;
	info!(
		request_id = %ctx.request_id,
		draft_id = %draft.id,
		revision = ?draft.applied_policy_revision,
		"change request merged"
	);
	Ok(Json(draft))
}
