// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use axum::{
	body::Body,
	http::{header, HeaderMap, Method, Request, StatusCode},
	response::Response,
	Router,
};
use loom_authz_core::{Effect, MemoryPolicyStore, Mode, PolicyRow, PolicyStore};
use loom_common_routing::{AllowlistRule, RouteClass};
use loom_server_db::{testing::create_migrated_test_pool, Tenant, TenantRepository, TenantStore};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use loom_server::{create_app_state_with, create_router, AppState, ServerConfig};

pub const TENANT_HOST: &str = "acme.test";

pub fn test_rules() -> Vec<AllowlistRule> {
	vec![
		AllowlistRule::new("/core/api", RouteClass::InternalApi),
		AllowlistRule::new("/webhooks", RouteClass::Webhook),
		AllowlistRule::new("/debug", RouteClass::Ops),
		AllowlistRule::new("/health", RouteClass::Ops),
		AllowlistRule::new("/__test__", RouteClass::Test),
	]
}

/// Enforcing configuration with test routes switched on.
pub fn enforcing_config() -> ServerConfig {
	let mut config = ServerConfig::default();
	config.authz.mode = Mode::Enforce;
	config.environment.enable_test_endpoints = true;
	config
}

pub fn user_subject(tenant: &Tenant, user: Uuid) -> String {
	format!("tenant:{}:user:{user}", tenant.id)
}

pub struct TestApp {
	pub router: Router,
	pub state: AppState,
	pub tenant: Tenant,
	/// Holds `role:authz-admin` in the tenant.
	pub admin: Uuid,
	/// Holds `role:authz-viewer` in the tenant.
	pub viewer: Uuid,
	/// No grants at all.
	pub stranger: Uuid,
}

pub struct TestResponse {
	pub status: StatusCode,
	pub headers: HeaderMap,
	pub body: Value,
	pub text: String,
}

impl TestApp {
	pub async fn new() -> Self {
		Self::with_config(enforcing_config()).await
	}

	pub async fn with_config(config: ServerConfig) -> Self {
		let pool = create_migrated_test_pool().await;
		let tenant = Tenant::new("Acme", TENANT_HOST);
		TenantRepository::new(pool.clone())
			.create_tenant(&tenant)
			.await
			.unwrap();

		let admin = Uuid::new_v4();
		let viewer = Uuid::new_v4();
		let stranger = Uuid::new_v4();
		let domain = tenant.id.to_string();
		let rows = vec![
			PolicyRow::grouping(user_subject(&tenant, admin), "role:authz-admin", domain.clone()),
			PolicyRow::grouping(user_subject(&tenant, viewer), "role:authz-viewer", domain),
			PolicyRow::policy("role:authz-admin", "*", "core.authz", "*", Effect::Allow),
			PolicyRow::policy("role:authz-viewer", "*", "core.authz", "read", Effect::Allow),
		];
		let store: Arc<dyn PolicyStore> = Arc::new(MemoryPolicyStore::new(rows));

		let state = create_app_state_with(pool, &config, test_rules(), store)
			.await
			.unwrap();
		let router = create_router(state.clone());

		Self {
			router,
			state,
			tenant,
			admin,
			viewer,
			stranger,
		}
	}

	pub fn domain(&self) -> String {
		self.tenant.id.to_string()
	}

	pub fn revision(&self) -> String {
		self.state.authz.revision().to_string()
	}

	pub fn builder(&self, method: Method, path: &str, user: Option<Uuid>) -> axum::http::request::Builder {
		let mut builder = Request::builder()
			.method(method)
			.uri(path)
			.header(header::HOST, TENANT_HOST);
		if let Some(user) = user {
			builder = builder.header(self.state.config.authz.user_header.as_str(), user.to_string());
		}
		builder
	}

	pub async fn send(&self, request: Request<Body>) -> TestResponse {
		read(self.router.clone().oneshot(request).await.unwrap()).await
	}

	pub async fn get(&self, path: &str, user: Option<Uuid>) -> TestResponse {
		let request = self.builder(Method::GET, path, user).body(Body::empty()).unwrap();
		self.send(request).await
	}

	pub async fn post(&self, path: &str, user: Option<Uuid>, body: Value) -> TestResponse {
		self.json(Method::POST, path, user, body).await
	}

	pub async fn json(&self, method: Method, path: &str, user: Option<Uuid>, body: Value) -> TestResponse {
		let request = self
			.builder(method, path, user)
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body.to_string()))
			.unwrap();
		self.send(request).await
	}

	pub async fn delete(&self, path: &str, user: Option<Uuid>) -> TestResponse {
		let request = self.builder(Method::DELETE, path, user).body(Body::empty()).unwrap();
		self.send(request).await
	}

	/// Stage one `p` row in the tenant domain as the admin.
	pub async fn stage_policy(&self, subject: &str, object: &str, action: &str) -> TestResponse {
		let body = serde_json::json!({
			"type": "p",
			"subject": subject,
			"domain": self.domain(),
			"object": object,
			"action": action,
			"effect": "allow",
		});
		let response = self
			.post("/core/api/authz/policies/stage", Some(self.admin), body)
			.await;
		assert_eq!(response.status, StatusCode::CREATED, "stage failed: {}", response.text);
		response
	}
}

pub async fn read(response: Response) -> TestResponse {
	let (parts, body) = response.into_parts();
	let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
	let text = String::from_utf8_lossy(&bytes).to_string();
	TestResponse {
		status: parts.status,
		headers: parts.headers,
		body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
		text,
	}
}

impl TestResponse {
	pub fn code(&self) -> &str {
		self.body["code"].as_str().unwrap_or_default()
	}

	#[track_caller]
	pub fn assert_status(&self, expected: StatusCode) -> &Self {
		assert_eq!(self.status, expected, "unexpected status, body: {}", self.text);
		self
	}
}
