// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Per-request context assembled from what the middleware pack attached.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use loom_authz_core::{
	domain_from_tenant, subject_for_user, AuthorizationRequest, AuthzOutcome, StageKey,
};
use loom_common_routing::RouteClass;
use uuid::Uuid;

use crate::{api::AppState, api_response::ApiError, middleware::ViewStateSlot};

/// Set by the request logger.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Set by the tenant middleware once the host resolved.
#[derive(Debug, Clone, Copy)]
pub struct TenantId(pub Uuid);

/// Immutable view of who is calling, from where, for which tenant.
#[derive(Debug, Clone)]
pub struct RequestCtx {
	pub request_id: String,
	pub route_class: RouteClass,
	pub path: String,
	pub tenant_id: Option<Uuid>,
	pub user_id: Option<Uuid>,
	/// Shared with every other extractor of this request.
	pub view_state: ViewStateSlot,
}

impl RequestCtx {
	pub fn subject(&self) -> String {
		subject_for_user(self.tenant_id, self.user_id)
	}

	pub fn domain(&self) -> String {
		domain_from_tenant(self.tenant_id)
	}

	pub fn require_user(&self) -> Result<Uuid, ApiError> {
		self.user_id.ok_or_else(ApiError::no_user)
	}

	pub fn require_tenant(&self) -> Result<Uuid, ApiError> {
		self.tenant_id.ok_or_else(ApiError::no_tenant)
	}

	pub fn stage_key(&self) -> Result<StageKey, ApiError> {
		Ok(StageKey::new(self.require_user()?, self.tenant_id))
	}

	/// Require `object`/`action` for the caller in the tenant's domain.
	///
	/// The outcome is recorded in the request's view state.
	pub fn authorize(&self, state: &AppState, object: &str, action: &str) -> Result<(), ApiError> {
		self.require_user()?;
		let subject = self.subject();
		let request = AuthorizationRequest::new(subject.clone(), self.domain(), object, action);
		let cancel = state.shutdown.child_token();
		let (outcome, suggest_diff) = self.view_state.with(self.tenant_id, &subject, |view_state| {
			state
				.authz
				.ensure_authz(&cancel, view_state, &request, None)
				.map(|outcome| (outcome, view_state.suggest_diff()))
		})?;
		match outcome {
			AuthzOutcome::Allowed => Ok(()),
			AuthzOutcome::Forbidden {
				subject,
				domain,
				object,
				action,
				missing_policies,
			} => Err(ApiError::forbidden(
				&subject,
				&domain,
				&object,
				&action,
				&missing_policies,
				&suggest_diff,
			)),
		}
	}
}

impl FromRequestParts<AppState> for RequestCtx {
	type Rejection = Infallible;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		let path = parts.uri.path().to_string();
		let route_class = parts
			.extensions
			.get::<RouteClass>()
			.copied()
			.unwrap_or_else(|| state.classifier.classify_path(&path));
		let request_id = parts
			.extensions
			.get::<RequestId>()
			.map(|r| r.0.clone())
			.unwrap_or_default();
		let tenant_id = parts.extensions.get::<TenantId>().map(|t| t.0);
		let view_state = parts.extensions.get::<ViewStateSlot>().cloned().unwrap_or_default();
		let user_id = parts
			.headers
			.get(state.config.authz.user_header.as_str())
			.and_then(|v| v.to_str().ok())
			.and_then(|v| match Uuid::parse_str(v.trim()) {
				Ok(id) => Some(id),
				Err(_) => {
					tracing::debug!(path = %path, "ignoring malformed user header");
					None
				}
			});

		Ok(Self {
			request_id,
			route_class,
			path,
			tenant_id,
			user_id,
			view_state,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ctx(tenant_id: Option<Uuid>, user_id: Option<Uuid>) -> RequestCtx {
		RequestCtx {
			request_id: "req-1".to_string(),
			route_class: RouteClass::InternalApi,
			path: "/core/api/authz/policies".to_string(),
			tenant_id,
			user_id,
			view_state: ViewStateSlot::default(),
		}
	}

	#[test]
	fn test_subject_and_domain_follow_tenant() {
		let tenant = Uuid::new_v4();
		let user = Uuid::new_v4();
		let ctx = ctx(Some(tenant), Some(user));
		assert_eq!(ctx.subject(), format!("tenant:{tenant}:user:{user}"));
		assert_eq!(ctx.domain(), tenant.to_string());
	}

	#[test]
	fn test_missing_user_is_unauthorized() {
		let err = ctx(None, None).require_user().unwrap_err();
		assert_eq!(err.code(), "AUTHZ_NO_USER");
		assert_eq!(ctx(None, None).domain(), "global");
	}

	#[tokio::test]
	async fn test_checks_in_one_request_share_view_state() {
		use std::sync::Arc;

		use axum::{
			body::Body,
			extract::{Request, State},
			http::StatusCode,
			middleware::from_fn,
			routing::get,
			Router,
		};
		use loom_authz_core::{parse_policy_csv, MemoryPolicyStore, Mode, ViewStateSnapshot};
		use loom_server_db::testing::create_migrated_test_pool;
		use tower::ServiceExt;

		use crate::{api::create_app_state_with, middleware::attach_view_state, ServerConfig};

		let user = Uuid::new_v4();
		let policy = format!(
			"g, {}, role:authz-viewer, global\np, role:authz-viewer, *, core.authz, read, allow\n",
			subject_for_user(None, Some(user))
		);
		let mut config = ServerConfig::default();
		config.authz.mode = Mode::Enforce;
		let store = Arc::new(MemoryPolicyStore::new(parse_policy_csv(&policy).unwrap()));
		let state = create_app_state_with(create_migrated_test_pool().await, &config, Vec::new(), store)
			.await
			.unwrap();

		let app = Router::new()
			.route(
				"/check",
				get(|State(state): State<AppState>, ctx: RequestCtx| async move {
					ctx.authorize(&state, "core.authz", "read").unwrap();
					assert!(ctx.authorize(&state, "core.authz", "manage").is_err());
					StatusCode::OK
				}),
			)
			.layer(from_fn(attach_view_state))
			.with_state(state);

		let response = app
			.oneshot(
				Request::builder()
					.uri("/check")
					.header(config.authz.user_header.as_str(), user.to_string())
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);

		let snapshot = response.extensions().get::<ViewStateSnapshot>().unwrap();
		assert_eq!(snapshot.subject, subject_for_user(None, Some(user)));
		assert_eq!(snapshot.capabilities.get("core.authz.read"), Some(&true));
		assert_eq!(snapshot.capabilities.get("core.authz.manage"), Some(&false));
		assert_eq!(snapshot.missing_policies.len(), 1);
	}
}
