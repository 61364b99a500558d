// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The JSON error envelope shared by every API-classified failure.
//!
//! ```json
//! { "code": "UPPER_SNAKE", "message": "short human", "meta": { "path": "/..." } }
//! ```
//!
//! Handlers return `Result<_, ApiError>`; the domain errors of the policy
//! crates convert with `?`. Middleware that runs outside a handler picks the
//! body shape with [`ApiError::into_class_response`].

use std::time::Duration;

use axum::{
	http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
	response::{Html, IntoResponse, Response},
	Json,
};
use loom_authz_core::{AuthzError, MissingPolicy, PolicySuggestion, StageError};
use loom_common_routing::RouteClass;
use loom_server_authz::{ApplyError, DraftError};
use serde::Serialize;
use serde_json::{Map, Value};
use utoipa::ToSchema;

pub const BASE_REVISION_HEADER: &str = "x-authz-base-revision";
pub const REQUESTS_URL: &str = "/core/api/authz/requests";
pub const DEBUG_URL: &str = "/core/api/authz/debug";

/// Wire shape of the envelope, for the OpenAPI document.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorEnvelope {
	pub code: String,
	pub message: String,
	#[schema(value_type = Object)]
	pub meta: Map<String, Value>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	code: &'static str,
	message: String,
	meta: Map<String, Value>,
	fields: Map<String, Value>,
	headers: HeaderMap,
}

impl ApiError {
	pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
		Self {
			status,
			code,
			message: message.into(),
			meta: Map::new(),
			fields: Map::new(),
			headers: HeaderMap::new(),
		}
	}

	pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
		self.meta.insert(key.to_string(), value.into());
		self
	}

	/// Add a top-level field next to `code` and `message`.
	pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
		self.fields.insert(key.to_string(), value.into());
		self
	}

	pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
		if let Ok(value) = HeaderValue::from_str(value) {
			self.headers.insert(HeaderName::from_static(name), value);
		}
		self
	}

	pub fn status(&self) -> StatusCode {
		self.status
	}

	pub fn code(&self) -> &'static str {
		self.code
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	pub fn not_found(path: &str) -> Self {
		Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", "resource not found").with_meta("path", path)
	}

	pub fn method_not_allowed(path: &str, method: &str) -> Self {
		Self::new(
			StatusCode::METHOD_NOT_ALLOWED,
			"METHOD_NOT_ALLOWED",
			"method not allowed",
		)
		.with_meta("path", path)
		.with_meta("method", method)
	}

	pub fn internal(path: &str, request_id: &str) -> Self {
		Self::new(
			StatusCode::INTERNAL_SERVER_ERROR,
			"INTERNAL_SERVER_ERROR",
			"internal server error",
		)
		.with_meta("path", path)
		.with_meta("request_id", request_id)
	}

	pub fn invalid_body(message: impl Into<String>) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "AUTHZ_INVALID_BODY", message)
	}

	pub fn invalid_query(message: impl Into<String>) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "AUTHZ_INVALID_QUERY", message)
	}

	pub fn no_user() -> Self {
		Self::new(StatusCode::UNAUTHORIZED, "AUTHZ_NO_USER", "no authenticated user")
	}

	pub fn no_tenant() -> Self {
		Self::new(StatusCode::BAD_REQUEST, "AUTHZ_NO_TENANT", "no tenant for this host")
	}

	pub fn rate_limited(retry_after: Duration) -> Self {
		let secs = retry_after.as_secs().max(1);
		Self::new(
			StatusCode::TOO_MANY_REQUESTS,
			"AUTHZ_RATE_LIMITED",
			"rate limit exceeded",
		)
		.with_meta("retry_after", secs)
		.with_header("retry-after", &secs.to_string())
	}

	pub fn revision_mismatch(current: &str) -> Self {
		Self::new(
			StatusCode::CONFLICT,
			"AUTHZ_BASE_REVISION_MISMATCH",
			"policy revision changed; refresh and retry",
		)
		.with_meta("base_revision", current)
		.with_header(BASE_REVISION_HEADER, current)
	}

	/// The payload pages and clients use to offer a policy request.
	pub fn forbidden(
		subject: &str,
		domain: &str,
		object: &str,
		action: &str,
		missing_policies: &[MissingPolicy],
		suggest_diff: &[PolicySuggestion],
	) -> Self {
		let debug_url =
			format!("{DEBUG_URL}?subject={subject}&domain={domain}&object={object}&action={action}");
		Self::new(
			StatusCode::FORBIDDEN,
			"AUTHZ_FORBIDDEN",
			format!("{subject} cannot {action} {object}"),
		)
		.with_field("error", "forbidden")
		.with_field("subject", subject)
		.with_field("domain", domain)
		.with_field("object", object)
		.with_field("action", action)
		.with_field("missing_policies", to_value(missing_policies))
		.with_field("suggest_diff", to_value(suggest_diff))
		.with_field("request_url", REQUESTS_URL)
		.with_field("debug_url", debug_url)
	}

	/// JSON for API classes; a minimal page or plain text otherwise.
	pub fn into_class_response(self, class: RouteClass) -> Response {
		if class.is_api() {
			return self.into_response();
		}
		let status = self.status;
		let mut response = match status {
			StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => {
				let title = status.canonical_reason().unwrap_or("Error");
				Html(format!(
					"<!doctype html><html><head><title>{title}</title></head>\
					 <body><h1>{} {title}</h1></body></html>",
					status.as_u16()
				))
				.into_response()
			}
			_ => self.message.clone().into_response(),
		};
		*response.status_mut() = status;
		response.headers_mut().extend(self.headers);
		response
	}

	fn body(&self) -> Value {
		let mut body = self.fields.clone();
		body.insert("code".to_string(), Value::from(self.code));
		body.insert("message".to_string(), Value::from(self.message.clone()));
		body.insert("meta".to_string(), Value::Object(self.meta.clone()));
		Value::Object(body)
	}
}

fn to_value<T: Serialize>(value: T) -> Value {
	serde_json::to_value(value).unwrap_or(Value::Null)
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let mut response = (self.status, Json(self.body())).into_response();
		response.headers_mut().insert(
			header::CONTENT_TYPE,
			HeaderValue::from_static("application/json"),
		);
		response.headers_mut().extend(self.headers);
		response
	}
}

impl From<StageError> for ApiError {
	fn from(e: StageError) -> Self {
		let status = match e {
			StageError::NotFound(_) => StatusCode::NOT_FOUND,
			_ => StatusCode::BAD_REQUEST,
		};
		let err = ApiError::new(status, "AUTHZ_STAGE_ERROR", e.to_string());
		match e {
			StageError::NotFound(id) => err.with_meta("id", id.to_string()),
			StageError::LimitReached(limit) => err.with_meta("limit", limit),
			_ => err,
		}
	}
}

impl From<DraftError> for ApiError {
	fn from(e: DraftError) -> Self {
		match e {
			DraftError::NotFound | DraftError::TenantMismatch => ApiError::new(
				StatusCode::NOT_FOUND,
				"AUTHZ_NOT_FOUND",
				"policy change request not found",
			),
			DraftError::InvalidDiff(msg) => {
				ApiError::new(StatusCode::BAD_REQUEST, "AUTHZ_INVALID_DIFF", msg)
			}
			DraftError::RevisionMismatch { current } => ApiError::revision_mismatch(&current),
			DraftError::InvalidStatusTransition { from, to } => ApiError::new(
				StatusCode::CONFLICT,
				"AUTHZ_INVALID_STATE",
				format!("cannot move from {from} to {to}"),
			)
			.with_meta("from", from.as_str())
			.with_meta("to", to.as_str()),
			DraftError::MissingSnapshot => ApiError::new(
				StatusCode::CONFLICT,
				"AUTHZ_NO_SNAPSHOT",
				"policy change request has no applied snapshot",
			),
			DraftError::InvalidParams(msg) => ApiError::invalid_body(msg),
			e @ (DraftError::Revision(_) | DraftError::Repository(_)) => {
				tracing::error!(error = %e, "policy change request storage failed");
				ApiError::new(
					StatusCode::INTERNAL_SERVER_ERROR,
					"INTERNAL_SERVER_ERROR",
					"internal server error",
				)
			}
		}
	}
}

impl From<ApplyError> for ApiError {
	fn from(e: ApplyError) -> Self {
		match e {
			ApplyError::StageEmpty => ApiError::new(
				StatusCode::BAD_REQUEST,
				"AUTHZ_STAGE_EMPTY",
				"no staged changes to apply",
			),
			ApplyError::MissingBaseRevision => ApiError::invalid_body("base_revision is required"),
			ApplyError::InvalidChange(msg) => ApiError::invalid_body(msg),
			ApplyError::RevisionMismatch { current } => ApiError::revision_mismatch(&current),
			ApplyError::ApplyFailed(msg) => ApiError::new(
				StatusCode::UNPROCESSABLE_ENTITY,
				"AUTHZ_POLICY_APPLY_FAILED",
				msg,
			),
			ApplyError::WriteFailed(msg) => {
				tracing::error!(error = %msg, "policy write failed");
				ApiError::new(
					StatusCode::INTERNAL_SERVER_ERROR,
					"AUTHZ_POLICY_WRITE_FAILED",
					"policy write failed",
				)
			}
			ApplyError::Locked => ApiError::new(
				StatusCode::LOCKED,
				"AUTHZ_BOT_LOCKED",
				"policy change request is locked by another worker",
			),
			ApplyError::Cancelled => ApiError::new(
				StatusCode::SERVICE_UNAVAILABLE,
				"AUTHZ_CANCELLED",
				"apply cancelled",
			),
			ApplyError::Draft(e) => e.into(),
		}
	}
}

impl From<AuthzError> for ApiError {
	fn from(e: AuthzError) -> Self {
		match e {
			AuthzError::Forbidden {
				subject,
				domain,
				object,
				action,
			} => ApiError::forbidden(&subject, &domain, &object, &action, &[], &[]),
			AuthzError::InvalidRequest(msg) => ApiError::invalid_query(msg),
			AuthzError::Cancelled => ApiError::new(
				StatusCode::SERVICE_UNAVAILABLE,
				"AUTHZ_CANCELLED",
				"authorization cancelled",
			),
			AuthzError::Store(e) => {
				tracing::error!(error = %e, "policy store failed during authorization");
				ApiError::new(
					StatusCode::INTERNAL_SERVER_ERROR,
					"INTERNAL_SERVER_ERROR",
					"internal server error",
				)
			}
		}
	}
}
