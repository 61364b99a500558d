// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Policy browsing, staging, apply and debug handlers.

use std::collections::BTreeMap;

use axum::{
	body::Bytes,
	extract::{rejection::QueryRejection, FromRequest, Query, Request, State},
	http::{header, StatusCode},
	response::IntoResponse,
	Form, Json,
};
use loom_authz_core::{AuthorizationRequest, AuthzError, PolicyRow, StagePayload, StagedEntry};
use loom_server_authz::{ApplyContext, ApplyOutcome, ApplyRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
	api::AppState,
	api_response::{ApiError, ErrorEnvelope},
	context::RequestCtx,
	rate_limit::{APPLY_ENDPOINT, DEBUG_ENDPOINT},
};

const AUTHZ_OBJECT: &str = "core.authz";
const DEFAULT_PAGE_LIMIT: usize = 50;
const MAX_PAGE_LIMIT: usize = 500;
const ATTRIBUTE_PREFIX: &str = "attr.";

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListPoliciesQuery {
	/// Exact subject match
	pub subject: Option<String>,
	/// Exact domain match
	pub domain: Option<String>,
	/// `p`, `g` or `g2`
	#[serde(rename = "type")]
	pub ptype: Option<String>,
	/// Case-insensitive substring of object or action
	pub q: Option<String>,
	pub page: Option<String>,
	pub limit: Option<String>,
	/// `field`, `-field` or `field:desc`
	pub sort: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PolicyListResponse {
	pub data: Vec<PolicyRow>,
	pub total: usize,
	pub page: usize,
	pub limit: usize,
	pub revision: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortField {
	Object,
	Subject,
	Domain,
	Type,
	Action,
	Effect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PolicyListParams {
	subject: Option<String>,
	domain: Option<String>,
	ptype: Option<String>,
	search: Option<String>,
	page: usize,
	limit: usize,
	sort: SortField,
	ascending: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
	value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn positive(value: Option<String>, name: &str) -> Result<Option<usize>, ApiError> {
	match non_empty(value) {
		None => Ok(None),
		Some(raw) => match raw.parse::<usize>() {
			Ok(n) if n >= 1 => Ok(Some(n)),
			_ => Err(ApiError::invalid_query(format!("{name} must be a positive integer"))),
		},
	}
}

impl PolicyListParams {
	fn parse(query: ListPoliciesQuery) -> Result<Self, ApiError> {
		let page = positive(query.page, "page")?.unwrap_or(1);
		let limit = positive(query.limit, "limit")?
			.unwrap_or(DEFAULT_PAGE_LIMIT)
			.min(MAX_PAGE_LIMIT);

		let (sort, ascending) = match non_empty(query.sort) {
			None => (SortField::Object, true),
			Some(raw) => {
				let (name, ascending) = if let Some(rest) = raw.strip_prefix('-') {
					(rest.to_string(), false)
				} else if let Some((name, dir)) = raw.split_once(':') {
					(name.to_string(), !dir.trim().eq_ignore_ascii_case("desc"))
				} else {
					(raw, true)
				};
				let field = match name.trim().to_ascii_lowercase().as_str() {
					"object" => SortField::Object,
					"subject" => SortField::Subject,
					"domain" => SortField::Domain,
					"type" => SortField::Type,
					"action" => SortField::Action,
					"effect" => SortField::Effect,
					other => {
						return Err(ApiError::invalid_query(format!("unknown sort field '{other}'")));
					}
				};
				(field, ascending)
			}
		};

		Ok(Self {
			subject: non_empty(query.subject),
			domain: non_empty(query.domain),
			ptype: non_empty(query.ptype).map(|t| t.to_ascii_lowercase()),
			search: non_empty(query.q).map(|q| q.to_lowercase()),
			page,
			limit,
			sort,
			ascending,
		})
	}

	fn matches(&self, row: &PolicyRow) -> bool {
		if self.subject.as_deref().is_some_and(|s| s != row.subject) {
			return false;
		}
		if self.domain.as_deref().is_some_and(|d| d != row.domain) {
			return false;
		}
		if self.ptype.as_deref().is_some_and(|t| t != row.ptype.as_str()) {
			return false;
		}
		if let Some(search) = &self.search {
			if !row.object.to_lowercase().contains(search) && !row.action.to_lowercase().contains(search) {
				return false;
			}
		}
		true
	}

	fn key<'a>(&self, row: &'a PolicyRow) -> &'a str {
		match self.sort {
			SortField::Object => &row.object,
			SortField::Subject => &row.subject,
			SortField::Domain => &row.domain,
			SortField::Type => row.ptype.as_str(),
			SortField::Action => &row.action,
			SortField::Effect => row.effect.as_str(),
		}
	}

	/// Filter, sort and cut one page. Returns the page and the filtered total.
	fn paginate(&self, rows: &[PolicyRow]) -> (Vec<PolicyRow>, usize) {
		let mut filtered: Vec<&PolicyRow> = rows.iter().filter(|r| self.matches(r)).collect();
		filtered.sort_by(|a, b| {
			let ord = self.key(a).cmp(self.key(b));
			if self.ascending {
				ord
			} else {
				ord.reverse()
			}
		});
		let total = filtered.len();
		let start = (self.page - 1).saturating_mul(self.limit).min(total);
		let end = start.saturating_add(self.limit).min(total);
		(filtered[start..end].iter().map(|r| (*r).clone()).collect(), total)
	}
}

#[utoipa::path(
    get,
    path = "/core/api/authz/policies",
    params(ListPoliciesQuery),
    responses(
        (status = 200, description = "Page of policy rows", body = PolicyListResponse),
        (status = 400, description = "Invalid query", body = ErrorEnvelope),
        (status = 403, description = "Missing core.authz read", body = ErrorEnvelope)
    ),
    tag = "authz"
)]
/// GET /core/api/authz/policies - List the active policy rows.
pub async fn list_policies(
	State(state): State<AppState>,
	ctx: RequestCtx,
	query: Result<Query<ListPoliciesQuery>, QueryRejection>,
) -> Result<Json<PolicyListResponse>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "read")?;
	let Query(query) = query.map_err(|e| ApiError::invalid_query(e.body_text()))?;
	let params = PolicyListParams::parse(query)?;

	let snapshot = state.authz.current_snapshot();
	let (data, total) = params.paginate(snapshot.rows());

	Ok(Json(PolicyListResponse {
		data,
		total,
		page: params.page,
		limit: params.limit,
		revision: snapshot.revision().to_string(),
	}))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum StageBody {
	Many(Vec<StagePayload>),
	One(StagePayload),
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StageResponse {
	pub data: Vec<StagedEntry>,
	pub total: usize,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub created_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StageQuery {
	pub id: Option<String>,
	pub subject: Option<String>,
	pub domain: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StageDeleteBody {
	#[serde(default)]
	pub ids: Vec<Uuid>,
}

fn is_json(req: &Request) -> bool {
	req.headers()
		.get(header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.is_some_and(|v| v.to_ascii_lowercase().contains("application/json"))
}

async fn decode_stage_payloads(req: Request, state: &AppState) -> Result<Vec<StagePayload>, ApiError> {
	if is_json(&req) {
		let Json(body) = Json::<StageBody>::from_request(req, state)
			.await
			.map_err(|e| ApiError::invalid_body(e.body_text()))?;
		return Ok(match body {
			StageBody::Many(many) => many,
			StageBody::One(one) => vec![one],
		});
	}
	let Form(payload) = Form::<StagePayload>::from_request(req, state)
		.await
		.map_err(|e| ApiError::invalid_body(e.body_text()))?;
	Ok(vec![payload])
}

#[utoipa::path(
    get,
    path = "/core/api/authz/policies/stage",
    params(StageQuery),
    responses(
        (status = 200, description = "Staged entries", body = StageResponse),
        (status = 401, description = "No user", body = ErrorEnvelope)
    ),
    tag = "authz"
)]
/// GET /core/api/authz/policies/stage - List the caller's staged entries.
pub async fn list_stage(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Query(query): Query<StageQuery>,
) -> Result<Json<StageResponse>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "read")?;
	let key = ctx.stage_key()?;
	let data = state.stage.list(
		key,
		non_empty(query.subject).as_deref().unwrap_or(""),
		non_empty(query.domain).as_deref().unwrap_or(""),
	);
	Ok(Json(StageResponse {
		total: data.len(),
		data,
		created_ids: Vec::new(),
	}))
}

#[utoipa::path(
    post,
    path = "/core/api/authz/policies/stage",
    request_body(content = StageBody, description = "One payload or an array; form bodies carry one"),
    responses(
        (status = 201, description = "Entries staged", body = StageResponse),
        (status = 400, description = "Invalid payload or stage limit reached", body = ErrorEnvelope),
        (status = 403, description = "Missing core.authz manage", body = ErrorEnvelope)
    ),
    tag = "authz"
)]
/// POST /core/api/authz/policies/stage - Stage policy additions or removals.
pub async fn stage_policies(
	State(state): State<AppState>,
	ctx: RequestCtx,
	req: Request,
) -> Result<impl IntoResponse, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "manage")?;
	let key = ctx.stage_key()?;
	let payloads = decode_stage_payloads(req, &state).await?;

	let created = state.stage.add_many_with_ids(key, &payloads)?;
	let data = state.stage.list(key, "", "");
	debug!(staged = created.len(), total = data.len(), "policies staged");

	Ok((
		StatusCode::CREATED,
		Json(StageResponse {
			total: data.len(),
			data,
			created_ids: created.into_iter().map(|e| e.id).collect(),
		}),
	))
}

#[utoipa::path(
    delete,
    path = "/core/api/authz/policies/stage",
    params(StageQuery),
    request_body(content = StageDeleteBody, description = "Optional ids to delete"),
    responses(
        (status = 200, description = "Remaining staged entries", body = StageResponse),
        (status = 404, description = "Stage entry not found", body = ErrorEnvelope)
    ),
    tag = "authz"
)]
/// DELETE /core/api/authz/policies/stage - Remove staged entries.
///
/// `?id=` deletes one entry, a JSON `{ids}` body deletes several and
/// `?subject&domain` clears matching entries.
pub async fn delete_stage(
	State(state): State<AppState>,
	ctx: RequestCtx,
	Query(query): Query<StageQuery>,
	body: Bytes,
) -> Result<Json<StageResponse>, ApiError> {
	ctx.authorize(&state, AUTHZ_OBJECT, "manage")?;
	let key = ctx.stage_key()?;

	if let Some(raw) = non_empty(query.id) {
		let id = Uuid::parse_str(&raw).map_err(|_| ApiError::invalid_query("id must be a uuid"))?;
		state.stage.delete(key, id)?;
	} else if !body.iter().all(u8::is_ascii_whitespace) {
		let parsed: StageDeleteBody =
			serde_json::from_slice(&body).map_err(|e| ApiError::invalid_body(e.to_string()))?;
		state.stage.delete_many(key, &parsed.ids)?;
	} else {
		let subject = non_empty(query.subject).unwrap_or_default();
		let domain = non_empty(query.domain).unwrap_or_default();
		state.stage.clear(key, &subject, &domain);
	}

	let data = state.stage.list(key, "", "");
	Ok(Json(StageResponse {
		total: data.len(),
		data,
		created_ids: Vec::new(),
	}))
}

#[utoipa::path(
    post,
    path = "/core/api/authz/policies/apply",
    request_body = ApplyRequest,
    responses(
        (status = 200, description = "Changes applied", body = ApplyOutcome),
        (status = 400, description = "Stage empty or invalid body", body = ErrorEnvelope),
        (status = 409, description = "Base revision mismatch", body = ErrorEnvelope),
        (status = 422, description = "Structural policy error", body = ErrorEnvelope),
        (status = 429, description = "Rate limited", body = ErrorEnvelope)
    ),
    tag = "authz"
)]
/// POST /core/api/authz/policies/apply - Commit changes against a base revision.
pub async fn apply_policies(
	State(state): State<AppState>,
	ctx: RequestCtx,
	req: Request,
) -> Result<Json<ApplyOutcome>, ApiError> {
	state
		.rate_limiter
		.check(APPLY_ENDPOINT)
		.await
		.map_err(ApiError::rate_limited)?;
	ctx.authorize(&state, AUTHZ_OBJECT, "manage")?;

	let Json(request) = Json::<ApplyRequest>::from_request(req, &state)
		.await
		.map_err(|e| ApiError::invalid_body(e.body_text()))?;
	let apply_ctx = ApplyContext {
		stage_key: ctx.stage_key()?,
		actor: ctx.subject(),
	};
	let cancel = state.shutdown.child_token();
	let outcome = state.apply.apply_stage(&cancel, &apply_ctx, request).await?;
	info!(
		request_id = %ctx.request_id,
		revision = %outcome.revision,
		added = outcome.added.len(),
		removed = outcome.removed.len(),
		"policy apply committed"
	);
	Ok(Json(outcome))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DebugRequestView {
	pub subject: String,
	pub domain: String,
	pub object: String,
	pub action: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DebugTrace {
	pub matched_policy: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DebugResponse {
	pub allowed: bool,
	pub mode: String,
	pub latency_ms: u64,
	pub revision: String,
	pub request: DebugRequestView,
	pub attributes: BTreeMap<String, String>,
	pub trace: DebugTrace,
}

/// `attr.<key>=<value>` pairs; the last value of a repeated key wins.
fn debug_attributes(pairs: &[(String, String)]) -> BTreeMap<String, String> {
	pairs
		.iter()
		.filter_map(|(k, v)| {
			let key = k.strip_prefix(ATTRIBUTE_PREFIX)?.trim();
			(!key.is_empty()).then(|| (key.to_string(), v.clone()))
		})
		.collect()
}

fn last_value(pairs: &[(String, String)], name: &str) -> Option<String> {
	pairs
		.iter()
		.rev()
		.find(|(k, _)| k == name)
		.map(|(_, v)| v.trim().to_string())
		.filter(|v| !v.is_empty())
}

fn debug_invalid(message: impl Into<String>) -> ApiError {
	ApiError::new(StatusCode::BAD_REQUEST, "AUTHZ_DEBUG_INVALID", message)
}

#[utoipa::path(
    get,
    path = "/core/api/authz/debug",
    params(
        ("subject" = Option<String>, Query, description = "Defaults to the caller"),
        ("domain" = Option<String>, Query, description = "Defaults to the tenant domain"),
        ("object" = String, Query, description = "Object to check"),
        ("action" = String, Query, description = "Action to check")
    ),
    responses(
        (status = 200, description = "Decision with trace", body = DebugResponse),
        (status = 400, description = "Object or action missing", body = ErrorEnvelope),
        (status = 429, description = "Rate limited", body = ErrorEnvelope)
    ),
    tag = "authz"
)]
/// GET /core/api/authz/debug - Evaluate a request and return the decision trace.
pub async fn debug_authz(
	State(state): State<AppState>,
	ctx: RequestCtx,
	query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<DebugResponse>, ApiError> {
	state
		.rate_limiter
		.check(DEBUG_ENDPOINT)
		.await
		.map_err(ApiError::rate_limited)?;
	ctx.authorize(&state, AUTHZ_OBJECT, "debug")?;
	let Query(pairs) = query.map_err(|e| ApiError::invalid_query(e.body_text()))?;

	let subject = last_value(&pairs, "subject").unwrap_or_else(|| ctx.subject());
	let domain = last_value(&pairs, "domain").unwrap_or_else(|| ctx.domain());
	let (Some(object), Some(action)) = (last_value(&pairs, "object"), last_value(&pairs, "action"))
	else {
		return Err(debug_invalid("object and action are required"));
	};
	let attributes = debug_attributes(&pairs);

	let request = AuthorizationRequest::new(subject, domain, object, action).with_attributes(attributes);
	let cancel = state.shutdown.child_token();
	let result = match state.authz.inspect(&cancel, &request) {
		Ok(result) => result,
		Err(AuthzError::InvalidRequest(message)) => return Err(debug_invalid(message)),
		Err(e) => {
			error!(request_id = %ctx.request_id, error = %e, "authz debug check failed");
			return Err(ApiError::new(
				StatusCode::INTERNAL_SERVER_ERROR,
				"AUTHZ_DEBUG_ERROR",
				"failed to evaluate request",
			));
		}
	};

	let latency_ms = u64::try_from(result.latency.as_millis()).unwrap_or(u64::MAX);
	let trace = result.trace();
	info!(
		request_id = %ctx.request_id,
		subject = %result.request.subject,
		domain = %result.request.domain,
		object = %result.request.object,
		action = %result.request.action,
		allowed = result.allowed,
		latency_ms,
		matched_policy = ?trace,
		"authz debug evaluated request"
	);

	Ok(Json(DebugResponse {
		allowed: result.allowed,
		mode: result.mode.as_str().to_string(),
		latency_ms,
		revision: result.revision,
		request: DebugRequestView {
			subject: result.request.subject,
			domain: result.request.domain,
			object: result.request.object,
			action: result.request.action,
		},
		attributes: result.request.attributes,
		trace: DebugTrace {
			matched_policy: trace,
		},
	}))
}
