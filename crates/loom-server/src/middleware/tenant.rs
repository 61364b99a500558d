// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Host-based tenant resolution.

use std::sync::Arc;

use axum::{
	extract::{Request, State},
	http::{header, StatusCode},
	middleware::Next,
	response::Response,
};
use loom_common_routing::RouteClass;
use loom_server_db::TenantStore;
use tracing::{error, warn};

use crate::{api_response::ApiError, context::TenantId};

/// Trim, lowercase and drop any `:port`, keeping bracketed IPv6 literals.
pub fn normalize_host(raw: &str) -> String {
	let host = raw.trim().to_ascii_lowercase();
	if host.starts_with('[') {
		return match host.find(']') {
			Some(end) => host[..=end].to_string(),
			None => host,
		};
	}
	// Bare IPv6 has several colons and no port.
	if host.matches(':').count() > 1 {
		return host;
	}
	match host.rsplit_once(':') {
		Some((name, _port)) => name.to_string(),
		None => host,
	}
}

fn is_exempt(class: RouteClass, path: &str) -> bool {
	matches!(class, RouteClass::Ops | RouteClass::Static) || path == "/health"
}

pub async fn resolve_tenant(
	State(tenants): State<Arc<dyn TenantStore>>,
	mut req: Request,
	next: Next,
) -> Response {
	let class = req
		.extensions()
		.get::<RouteClass>()
		.copied()
		.unwrap_or(RouteClass::Ui);
	let path = req.uri().path().to_string();
	if is_exempt(class, &path) {
		return next.run(req).await;
	}

	let host = req
		.headers()
		.get(header::HOST)
		.and_then(|v| v.to_str().ok())
		.or_else(|| req.uri().host())
		.map(normalize_host)
		.unwrap_or_default();

	match tenants.get_tenant_by_domain(&host).await {
		Ok(Some(tenant)) => {
			req.extensions_mut().insert(TenantId(tenant.id));
			next.run(req).await
		}
		Ok(None) => {
			warn!(host = %host, path = %path, "tenant not found");
			ApiError::not_found(&path).into_class_response(class)
		}
		Err(e) => {
			error!(host = %host, error = %e, "tenant lookup failed");
			ApiError::new(
				StatusCode::INTERNAL_SERVER_ERROR,
				"INTERNAL_SERVER_ERROR",
				"tenant lookup failed",
			)
			.into_class_response(class)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use axum::{
		body::Body, middleware::from_fn_with_state, routing::get, Extension, Router,
	};
	use loom_server_db::{testing::create_migrated_test_pool, Tenant, TenantRepository};
	use tower::ServiceExt;

	#[test]
	fn test_normalize_host() {
		assert_eq!(normalize_host(" Acme.Example.com:8443 "), "acme.example.com");
		assert_eq!(normalize_host("acme.example.com"), "acme.example.com");
		assert_eq!(normalize_host("[::1]:8080"), "[::1]");
		assert_eq!(normalize_host("::1"), "::1");
	}

	async fn app() -> (Router, Tenant) {
		let pool = create_migrated_test_pool().await;
		let repo = TenantRepository::new(pool);
		let tenant = Tenant::new("Acme", "acme.test");
		repo.create_tenant(&tenant).await.unwrap();
		let store: Arc<dyn TenantStore> = Arc::new(repo);

		let router = Router::new()
			.route(
				"/core/api/authz/policies",
				get(|Extension(TenantId(id)): Extension<TenantId>| async move { id.to_string() }),
			)
			.route("/health", get(|| async { "ok" }))
			.layer(from_fn_with_state(store, resolve_tenant))
			.layer(Extension(RouteClass::InternalApi));
		(router, tenant)
	}

	fn get_with_host(path: &str, host: &str) -> Request {
		Request::builder()
			.uri(path)
			.header(header::HOST, host)
			.body(Body::empty())
			.unwrap()
	}

	#[tokio::test]
	async fn test_known_host_attaches_tenant() {
		let (app, tenant) = app().await;
		let response = app
			.oneshot(get_with_host("/core/api/authz/policies", "ACME.test:443"))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
		assert_eq!(body, tenant.id.to_string().as_bytes());
	}

	#[tokio::test]
	async fn test_unknown_host_is_not_found() {
		let (app, _) = app().await;
		let response = app
			.oneshot(get_with_host("/core/api/authz/policies", "other.test"))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}

	struct FailingTenants;

	#[async_trait::async_trait]
	impl TenantStore for FailingTenants {
		async fn get_tenant_by_domain(&self, _domain: &str) -> loom_server_db::Result<Option<Tenant>> {
			Err(loom_server_db::DbError::Internal("database is locked".to_string()))
		}

		async fn get_tenant_by_id(&self, _id: uuid::Uuid) -> loom_server_db::Result<Option<Tenant>> {
			Ok(None)
		}

		async fn create_tenant(&self, _tenant: &Tenant) -> loom_server_db::Result<()> {
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_lookup_failure_uses_internal_server_error_code() {
		let store: Arc<dyn TenantStore> = Arc::new(FailingTenants);
		let app = Router::new()
			.route("/core/api/authz/policies", get(|| async { "unreachable" }))
			.layer(from_fn_with_state(store, resolve_tenant))
			.layer(Extension(RouteClass::InternalApi));

		let response = app
			.oneshot(get_with_host("/core/api/authz/policies", "acme.test"))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
		let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
		assert_eq!(body["code"], "INTERNAL_SERVER_ERROR");
	}

	#[tokio::test]
	async fn test_health_is_exempt() {
		let (app, _) = app().await;
		let response = app.oneshot(get_with_host("/health", "nobody.test")).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}
}
