// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Application state and router assembly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
	middleware::{from_fn, from_fn_with_state},
	routing::{get, post},
	Router,
};
use loom_authz_core::{
	parse_policy_csv, AuthzService, FileModeProvider, FilePolicyStore, Mode, ModeProvider,
	PolicyRevision, PolicyStore, RevisionProvider, StageStore, StaticModeProvider, StoreError,
	AUTHZ_MODE_ENV,
};
use loom_common_eventbus::Filter;
use loom_common_routing::{load_allowlist, AllowlistRule, Classifier};
use loom_common_webhook::{ReplayCache, ReplayConfig};
use loom_server_authz::{ApplyController, PolicyDraftService, PolicyEvent, PolicyEventBus};
use loom_server_config::{PolicyBackend, ServerConfig};
use loom_server_db::{
	PolicyChangeRequestRepository, SqlitePolicyStore, SqlitePool, TenantRepository, TenantStore,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
	error::ServerError,
	metrics::AuthzMetrics,
	middleware::{
		attach_view_state, classify, hide_disabled_routes, method_not_allowed, not_found, ops_guard,
		request_logger, resolve_tenant, webhook_replay, OpsGuard, RouteGate,
	},
	rate_limit::RateLimiter,
	routes,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
	pub config: Arc<ServerConfig>,
	pub pool: SqlitePool,
	pub classifier: Arc<Classifier>,
	pub route_gate: Arc<RouteGate>,
	pub authz: Arc<AuthzService>,
	pub policy_store: Arc<dyn PolicyStore>,
	pub stage: Arc<StageStore>,
	pub drafts: Arc<PolicyDraftService>,
	pub apply: Arc<ApplyController>,
	pub events: Arc<PolicyEventBus>,
	pub tenants: Arc<dyn TenantStore>,
	pub replay_cache: Arc<ReplayCache>,
	pub rate_limiter: Arc<RateLimiter>,
	pub metrics: Arc<AuthzMetrics>,
	pub ops_guard: Arc<OpsGuard>,
	/// Cancelled on shutdown; handlers derive per-request tokens from it.
	pub shutdown: CancellationToken,
}

/// Revision lookups for the draft service, backed by the policy store.
struct StoreRevisions(Arc<dyn PolicyStore>);

#[async_trait]
impl RevisionProvider for StoreRevisions {
	async fn current(&self) -> Result<PolicyRevision, StoreError> {
		self.0.current().await
	}
}

/// Build state from configuration: allowlist, policy backend and services.
pub async fn create_app_state(pool: SqlitePool, config: &ServerConfig) -> Result<AppState, ServerError> {
	let rules = load_allowlist(&config.routing.allowlist_path, &config.routing.entrypoint)?;
	info!(
		path = %config.routing.allowlist_path.display(),
		rules = rules.len(),
		"route allowlist loaded"
	);

	let policy_store: Arc<dyn PolicyStore> = match config.authz.policy_backend {
		PolicyBackend::File => Arc::new(FilePolicyStore::open(config.authz.policy_path.clone()).await?),
		PolicyBackend::Sqlite => {
			let store = SqlitePolicyStore::new(pool.clone());
			store.ensure_revision().await?;
			match tokio::fs::read_to_string(&config.authz.policy_path).await {
				Ok(raw) => {
					let rows = parse_policy_csv(&raw).map_err(StoreError::from)?;
					if store.seed_if_empty(&rows).await? {
						info!(path = %config.authz.policy_path.display(), "seeded policy table from file");
					}
				}
				Err(e) => {
					warn!(
						path = %config.authz.policy_path.display(),
						error = %e,
						"seed policy file unreadable, using stored rows"
					);
				}
			}
			Arc::new(store)
		}
	};

	create_app_state_with(pool, config, rules, policy_store).await
}

/// Build state around an explicit allowlist and policy store.
pub async fn create_app_state_with(
	pool: SqlitePool,
	config: &ServerConfig,
	rules: Vec<AllowlistRule>,
	policy_store: Arc<dyn PolicyStore>,
) -> Result<AppState, ServerError> {
	let metrics = Arc::new(AuthzMetrics::new()?);

	let mode: Arc<dyn ModeProvider> = match &config.authz.mode_file {
		Some(path) => {
			let pinned = std::env::var(AUTHZ_MODE_ENV).ok().map(|v| Mode::sanitize(&v));
			Arc::new(FileModeProvider::new(path.clone(), config.authz.mode).with_override(pinned))
		}
		None => Arc::new(StaticModeProvider(config.authz.mode)),
	};
	let authz = Arc::new(
		AuthzService::from_store(policy_store.as_ref(), mode)
			.await?
			.with_observer(metrics.clone()),
	);
	info!(revision = %authz.revision(), mode = %authz.mode(), "authorization service ready");

	let events = Arc::new(PolicyEventBus::new());
	events.subscribe(Filter::Any, log_policy_event);

	let stage = Arc::new(StageStore::new(config.authz.stage_limit));
	let drafts = Arc::new(PolicyDraftService::new(
		Arc::new(PolicyChangeRequestRepository::new(pool.clone())),
		Arc::new(StoreRevisions(policy_store.clone())),
		events.clone(),
	));
	let apply = Arc::new(ApplyController::new(
		policy_store.clone(),
		authz.clone(),
		stage.clone(),
		drafts.clone(),
		events.clone(),
	));

	let classifier = Arc::new(Classifier::new(rules));
	let route_gate = Arc::new(RouteGate::new(classifier.clone(), &config.environment));
	let replay_cache = Arc::new(ReplayCache::new(ReplayConfig {
		ttl: Duration::from_secs(config.webhook_replay.ttl_secs),
		max_body_bytes: config.webhook_replay.max_body_bytes,
		max_entries: config.webhook_replay.max_entries,
	})?);
	let ops_guard = Arc::new(OpsGuard::from_config(
		&config.ops_guard,
		config.environment.is_production(),
	)?);

	Ok(AppState {
		config: Arc::new(config.clone()),
		tenants: Arc::new(TenantRepository::new(pool.clone())),
		pool,
		classifier,
		route_gate,
		authz,
		policy_store,
		stage,
		drafts,
		apply,
		events,
		replay_cache,
		rate_limiter: Arc::new(RateLimiter::per_minute(config.authz.rate_limit_per_minute)),
		metrics,
		ops_guard,
		shutdown: CancellationToken::new(),
	})
}

fn log_policy_event(event: &PolicyEvent) {
	match event {
		PolicyEvent::DraftCreated { draft } => {
			info!(draft_id = %draft.id, status = %draft.status, "policy change request created");
		}
		PolicyEvent::DraftStatusChanged {
			previous_status,
			draft,
		} => {
			info!(
				draft_id = %draft.id,
				from = %previous_status,
				to = %draft.status,
				"policy change request status changed"
			);
		}
		PolicyEvent::PolicyApplied(applied) => {
			info!(
				base_revision = %applied.base_revision,
				revision = %applied.revision,
				added = applied.added.len(),
				removed = applied.removed.len(),
				actor = %applied.actor,
				"policy change applied"
			);
		}
	}
}

pub fn create_router(state: AppState) -> Router {
	let authz = Router::new()
		.route("/policies", get(routes::authz::list_policies))
		.route(
			"/policies/stage",
			get(routes::authz::list_stage)
				.post(routes::authz::stage_policies)
				.delete(routes::authz::delete_stage),
		)
		.route("/policies/apply", post(routes::authz::apply_policies))
		.route("/debug", get(routes::authz::debug_authz))
		.route(
			"/requests",
			get(routes::requests::list_requests).post(routes::requests::create_request),
		)
		.route("/requests/{id}", get(routes::requests::get_request))
		.route("/requests/{id}/approve", post(routes::requests::approve_request))
		.route("/requests/{id}/reject", post(routes::requests::reject_request))
		.route("/requests/{id}/cancel", post(routes::requests::cancel_request))
		.route("/requests/{id}/submit", post(routes::requests::submit_request))
		.route("/requests/{id}/retry", post(routes::requests::retry_request))
		.route(
			"/requests/{id}/trigger-bot",
			post(routes::requests::trigger_bot_request),
		)
		.route("/requests/{id}/revert", post(routes::requests::revert_request))
		.route("/requests/{id}/apply", post(routes::requests::apply_request))
		.route("/openapi.json", get(routes::health::openapi_json));

	Router::new()
		.nest("/core/api/authz", authz)
		.route("/health", get(routes::health::health_check))
		.route("/debug/prometheus", get(routes::health::prometheus_metrics))
		.route("/__test__/panic", get(routes::test_support::panic_route))
		.fallback(not_found)
		.method_not_allowed_fallback(method_not_allowed)
		.layer(from_fn(attach_view_state))
		.layer(from_fn_with_state(state.tenants.clone(), resolve_tenant))
		.layer(from_fn_with_state(state.replay_cache.clone(), webhook_replay))
		.layer(from_fn_with_state(state.ops_guard.clone(), ops_guard))
		.layer(from_fn_with_state(state.route_gate.clone(), hide_disabled_routes))
		.layer(from_fn(request_logger))
		.layer(from_fn_with_state(state.route_gate.clone(), classify))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}
