// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization service.
//!
//! [`AuthzService`] wraps the current [`PolicySnapshot`] behind an
//! `RwLock<Arc<_>>`. Each call clones the `Arc` once and evaluates against
//! that snapshot for its whole duration, so a concurrent reload never shows
//! a call half of one rule set and half of another.
//!
//! Mode gating:
//!
//! | mode | `authorize` on deny |
//! |------|---------------------|
//! | `disabled` | `Ok`, engine not consulted |
//! | `shadow` | `Ok`, denial logged |
//! | `enforce` | [`AuthzError::Forbidden`] |

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::{Decision, PolicySnapshot};
use crate::error::{AuthzError, Result};
use crate::mode::{Mode, ModeProvider};
use crate::store::PolicyStore;
use crate::types::{capability_key, AuthorizationRequest, PolicyRow, GLOBAL_DOMAIN};
use crate::view_state::{MissingPolicy, ViewState};

/// Receives decision telemetry; implemented by the metrics layer.
pub trait DecisionObserver: Send + Sync {
	fn record_decision(&self, mode: Mode, allowed: bool);
	fn record_inspection(&self, mode: Mode, allowed: bool, latency: Duration);
	fn record_reload(&self);
}

/// Outcome of [`AuthzService::inspect`].
#[derive(Debug, Clone, Serialize)]
pub struct InspectionResult {
	pub allowed: bool,
	pub mode: Mode,
	pub latency: Duration,
	pub revision: String,
	pub request: AuthorizationRequest,
	pub matched: Vec<PolicyRow>,
}

impl InspectionResult {
	pub fn trace(&self) -> Vec<String> {
		self.matched.iter().map(PolicyRow::descriptor).collect()
	}
}

/// Outcome of [`AuthzService::ensure_authz`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzOutcome {
	Allowed,
	Forbidden {
		subject: String,
		domain: String,
		object: String,
		action: String,
		missing_policies: Vec<MissingPolicy>,
	},
}

impl AuthzOutcome {
	pub fn is_allowed(&self) -> bool {
		matches!(self, AuthzOutcome::Allowed)
	}
}

pub struct AuthzService {
	snapshot: RwLock<Arc<PolicySnapshot>>,
	/// Held from the store read until the swap so reloads install in order.
	reload_lock: tokio::sync::Mutex<()>,
	mode: Arc<dyn ModeProvider>,
	observer: Option<Arc<dyn DecisionObserver>>,
}

impl std::fmt::Debug for AuthzService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AuthzService")
			.field("revision", &self.revision())
			.field("mode", &self.mode())
			.finish()
	}
}

impl AuthzService {
	pub fn new(snapshot: PolicySnapshot, mode: Arc<dyn ModeProvider>) -> Self {
		Self {
			snapshot: RwLock::new(Arc::new(snapshot)),
			reload_lock: tokio::sync::Mutex::new(()),
			mode,
			observer: None,
		}
	}

	pub fn with_observer(mut self, observer: Arc<dyn DecisionObserver>) -> Self {
		self.observer = Some(observer);
		self
	}

	/// Build a service from the store's current snapshot.
	pub async fn from_store(store: &dyn PolicyStore, mode: Arc<dyn ModeProvider>) -> Result<Self> {
		let (rows, revision) = store.snapshot().await?;
		Ok(Self::new(PolicySnapshot::build(rows, revision.revision), mode))
	}

	pub fn mode(&self) -> Mode {
		self.mode.mode()
	}

	pub fn current_snapshot(&self) -> Arc<PolicySnapshot> {
		self
			.snapshot
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	pub fn revision(&self) -> String {
		self.current_snapshot().revision().to_string()
	}

	pub fn replace_snapshot(&self, snapshot: PolicySnapshot) {
		let next = Arc::new(snapshot);
		*self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = next;
	}

	/// Rebuild the snapshot from `store` and swap it in.
	///
	/// Concurrent reloads are serialized, so a reload that started after a
	/// store write always installs that write or a later one.
	#[instrument(skip(self, store))]
	pub async fn reload(&self, store: &dyn PolicyStore) -> Result<String> {
		let _guard = self.reload_lock.lock().await;
		let (rows, revision) = store.snapshot().await?;
		let count = rows.len();
		self.replace_snapshot(PolicySnapshot::build(rows, revision.revision.clone()));
		if let Some(observer) = &self.observer {
			observer.record_reload();
		}
		info!(revision = %revision.revision, rows = count, "authz policy reloaded");
		Ok(revision.revision)
	}

	fn prepare(&self, request: &AuthorizationRequest) -> Result<AuthorizationRequest> {
		let mut req = request.normalized();
		if req.subject.is_empty() {
			return Err(AuthzError::InvalidRequest("subject is required".to_string()));
		}
		if req.object.is_empty() {
			return Err(AuthzError::InvalidRequest("object is required".to_string()));
		}
		if req.action.is_empty() {
			return Err(AuthzError::InvalidRequest("action is required".to_string()));
		}
		if req.domain.is_empty() {
			req.domain = GLOBAL_DOMAIN.to_string();
		}
		Ok(req)
	}

	fn evaluate(
		&self,
		cancel: &CancellationToken,
		request: &AuthorizationRequest,
	) -> Result<(AuthorizationRequest, Decision, Arc<PolicySnapshot>)> {
		let req = self.prepare(request)?;
		let snapshot = self.current_snapshot();
		let subjects = snapshot.effective_subjects(&req.subject, &req.domain);
		if cancel.is_cancelled() {
			return Err(AuthzError::Cancelled);
		}
		let decision = snapshot.evaluate(&req, &subjects);
		Ok((req, decision, snapshot))
	}

	/// Mode-gated authorization. Only `enforce` turns a denial into an error.
	pub fn authorize(&self, cancel: &CancellationToken, request: &AuthorizationRequest) -> Result<()> {
		let mode = self.mode();
		if mode == Mode::Disabled {
			return Ok(());
		}

		let (req, decision, snapshot) = self.evaluate(cancel, request)?;
		if let Some(observer) = &self.observer {
			observer.record_decision(mode, decision.allowed);
		}
		if decision.allowed {
			debug!(subject = %req.subject, object = %req.object, action = %req.action, "authz allowed");
			return Ok(());
		}

		match mode {
			Mode::Enforce => {
				warn!(
					subject = %req.subject,
					domain = %req.domain,
					object = %req.object,
					action = %req.action,
					revision = %snapshot.revision(),
					mode = %mode,
					"authz denied request"
				);
				Err(AuthzError::Forbidden {
					subject: req.subject,
					domain: req.domain,
					object: req.object,
					action: req.action,
				})
			}
			_ => {
				warn!(
					subject = %req.subject,
					domain = %req.domain,
					object = %req.object,
					action = %req.action,
					revision = %snapshot.revision(),
					mode = %mode,
					"authz shadow deny"
				);
				Ok(())
			}
		}
	}

	/// Engine decision regardless of mode.
	pub fn check(&self, cancel: &CancellationToken, request: &AuthorizationRequest) -> Result<bool> {
		let (_, decision, _) = self.evaluate(cancel, request)?;
		Ok(decision.allowed)
	}

	/// Like [`AuthzService::check`], with the trace and timing.
	pub fn inspect(
		&self,
		cancel: &CancellationToken,
		request: &AuthorizationRequest,
	) -> Result<InspectionResult> {
		let start = Instant::now();
		let (req, decision, snapshot) = self.evaluate(cancel, request)?;
		let latency = start.elapsed();
		let mode = self.mode();
		if let Some(observer) = &self.observer {
			observer.record_inspection(mode, decision.allowed, latency);
		}
		Ok(InspectionResult {
			allowed: decision.allowed,
			mode,
			latency,
			revision: snapshot.revision().to_string(),
			request: req,
			matched: decision.matched,
		})
	}

	/// Authorize and record the outcome in `view_state`.
	///
	/// `legacy` is the result of a pre-existing permission check. In shadow
	/// mode the recorded capability is `legacy || engine`; in enforce mode
	/// `legacy` is ignored.
	pub fn ensure_authz(
		&self,
		cancel: &CancellationToken,
		view_state: &mut ViewState,
		request: &AuthorizationRequest,
		legacy: Option<bool>,
	) -> Result<AuthzOutcome> {
		let mode = self.mode();
		let key = capability_key(&request.object, &request.action);
		if mode == Mode::Disabled {
			view_state.set_capability(&key, true);
			return Ok(AuthzOutcome::Allowed);
		}

		let (req, decision, _) = self.evaluate(cancel, request)?;
		if let Some(observer) = &self.observer {
			observer.record_decision(mode, decision.allowed);
		}
		if !decision.allowed {
			view_state.add_missing_policy(&req.domain, &req.object, &req.action);
		}

		match mode {
			Mode::Enforce => {
				view_state.set_capability(&key, decision.allowed);
				if decision.allowed {
					return Ok(AuthzOutcome::Allowed);
				}
				Ok(AuthzOutcome::Forbidden {
					subject: req.subject,
					domain: req.domain,
					object: req.object,
					action: req.action,
					missing_policies: view_state.missing_policies().to_vec(),
				})
			}
			_ => {
				let allowed = legacy.map_or(decision.allowed, |l| l || decision.allowed);
				view_state.set_capability(&key, allowed);
				if !decision.allowed {
					warn!(
						subject = %req.subject,
						domain = %req.domain,
						object = %req.object,
						action = %req.action,
						legacy = ?legacy,
						"authz shadow deny"
					);
				}
				Ok(AuthzOutcome::Allowed)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mode::StaticModeProvider;
	use crate::policy_file::parse_policy_csv;
	use crate::store::{MemoryPolicyStore, PolicyChange};
	use crate::types::Effect;
	use std::sync::atomic::{AtomicUsize, Ordering};

	const POLICY: &str = "\
g, tenant:T:user:42, role:admin, global
p, role:admin, global, core.users, read
";

	fn service(mode: Mode) -> AuthzService {
		AuthzService::new(
			PolicySnapshot::build(parse_policy_csv(POLICY).unwrap(), "r1"),
			Arc::new(StaticModeProvider(mode)),
		)
	}

	fn read_users() -> AuthorizationRequest {
		AuthorizationRequest::new("tenant:T:user:42", "global", "core.users", "read")
	}

	fn delete_users() -> AuthorizationRequest {
		AuthorizationRequest::new("tenant:T:user:42", "global", "core.users", "delete")
	}

	#[derive(Default)]
	struct CountingObserver {
		decisions: AtomicUsize,
		inspections: AtomicUsize,
		reloads: AtomicUsize,
	}

	impl DecisionObserver for CountingObserver {
		fn record_decision(&self, _: Mode, _: bool) {
			self.decisions.fetch_add(1, Ordering::SeqCst);
		}
		fn record_inspection(&self, _: Mode, _: bool, _: Duration) {
			self.inspections.fetch_add(1, Ordering::SeqCst);
		}
		fn record_reload(&self) {
			self.reloads.fetch_add(1, Ordering::SeqCst);
		}
	}

	mod modes {
		use super::*;

		#[test]
		fn enforce_denies() {
			let svc = service(Mode::Enforce);
			let cancel = CancellationToken::new();
			assert!(svc.authorize(&cancel, &read_users()).is_ok());
			let err = svc.authorize(&cancel, &delete_users()).unwrap_err();
			assert!(err.is_forbidden());
		}

		#[test]
		fn shadow_never_denies() {
			let svc = service(Mode::Shadow);
			assert!(svc.authorize(&CancellationToken::new(), &delete_users()).is_ok());
		}

		#[test]
		fn disabled_skips_engine() {
			let svc = service(Mode::Disabled);
			let invalid = AuthorizationRequest::new("", "", "", "");
			assert!(svc.authorize(&CancellationToken::new(), &invalid).is_ok());
		}

		#[test]
		fn check_ignores_mode() {
			let svc = service(Mode::Disabled);
			assert!(!svc.check(&CancellationToken::new(), &delete_users()).unwrap());
		}
	}

	#[test]
	fn empty_action_rejected() {
		let svc = service(Mode::Enforce);
		let req = AuthorizationRequest::new("a", "global", "core.users", "  ");
		assert!(matches!(
			svc.check(&CancellationToken::new(), &req),
			Err(AuthzError::InvalidRequest(_))
		));
	}

	#[test]
	fn empty_domain_becomes_global() {
		let svc = service(Mode::Enforce);
		let req = AuthorizationRequest::new("tenant:T:user:42", "", "core.users", "READ");
		let result = svc.inspect(&CancellationToken::new(), &req).unwrap();
		assert!(result.allowed);
		assert_eq!(result.request.domain, "global");
		assert_eq!(result.request.action, "read");
	}

	#[test]
	fn cancelled_token_is_observed() {
		let svc = service(Mode::Enforce);
		let cancel = CancellationToken::new();
		cancel.cancel();
		assert!(matches!(
			svc.check(&cancel, &read_users()),
			Err(AuthzError::Cancelled)
		));
	}

	#[test]
	fn inspect_returns_trace_and_attributes() {
		let svc = service(Mode::Shadow);
		let req = read_users().with_attribute("attr.region", "eu");
		let result = svc.inspect(&CancellationToken::new(), &req).unwrap();
		assert!(result.allowed);
		assert_eq!(result.mode, Mode::Shadow);
		assert_eq!(result.revision, "r1");
		assert_eq!(result.trace(), vec!["p, role:admin, global, core.users, read, allow"]);
		assert_eq!(result.request.attributes.get("attr.region").unwrap(), "eu");
	}

	#[test]
	fn observer_counts() {
		let observer = Arc::new(CountingObserver::default());
		let svc = service(Mode::Enforce).with_observer(observer.clone());
		let cancel = CancellationToken::new();
		let _ = svc.authorize(&cancel, &read_users());
		let _ = svc.inspect(&cancel, &read_users());
		assert_eq!(observer.decisions.load(Ordering::SeqCst), 1);
		assert_eq!(observer.inspections.load(Ordering::SeqCst), 1);
	}

	mod ensure {
		use super::*;

		#[test]
		fn enforce_forbidden_records_missing() {
			let svc = service(Mode::Enforce);
			let mut vs = ViewState::new("tenant:T:user:42", "global");
			let outcome = svc
				.ensure_authz(&CancellationToken::new(), &mut vs, &delete_users(), None)
				.unwrap();
			match outcome {
				AuthzOutcome::Forbidden {
					object,
					action,
					missing_policies,
					..
				} => {
					assert_eq!(object, "core.users");
					assert_eq!(action, "delete");
					assert_eq!(missing_policies.len(), 1);
				}
				AuthzOutcome::Allowed => panic!("expected forbidden"),
			}
			assert_eq!(vs.capability_value("core.users.delete"), Some(false));
		}

		#[test]
		fn shadow_legacy_or_engine() {
			let svc = service(Mode::Shadow);
			let cancel = CancellationToken::new();
			let mut vs = ViewState::new("u", "global");

			let outcome = svc
				.ensure_authz(&cancel, &mut vs, &delete_users(), Some(true))
				.unwrap();
			assert!(outcome.is_allowed());
			assert!(vs.can_authz("core.users", "delete"));
			assert_eq!(vs.missing_policies().len(), 1);

			let mut vs = ViewState::new("u", "global");
			svc.ensure_authz(&cancel, &mut vs, &delete_users(), Some(false))
				.unwrap();
			assert!(!vs.can_authz("core.users", "delete"));

			let mut vs = ViewState::new("u", "global");
			svc.ensure_authz(&cancel, &mut vs, &read_users(), Some(false))
				.unwrap();
			assert!(vs.can_authz("core.users", "read"));
		}

		#[test]
		fn disabled_grants_capability() {
			let svc = service(Mode::Disabled);
			let mut vs = ViewState::new("u", "global");
			svc.ensure_authz(&CancellationToken::new(), &mut vs, &delete_users(), None)
				.unwrap();
			assert!(vs.can_authz("core.users", "delete"));
		}
	}

	mod reload {
		use super::*;
		use crate::error::StoreError;
		use crate::revision::{PolicyRevision, RevisionProvider};

		#[tokio::test]
		async fn reload_swaps_snapshot() {
			let store = MemoryPolicyStore::new(parse_policy_csv(POLICY).unwrap());
			let observer = Arc::new(CountingObserver::default());
			let svc = AuthzService::from_store(&store, Arc::new(StaticModeProvider(Mode::Enforce)))
				.await
				.unwrap()
				.with_observer(observer.clone());
			let cancel = CancellationToken::new();
			assert!(!svc.check(&cancel, &delete_users()).unwrap());

			let base = svc.revision();
			let row = PolicyRow::policy("role:admin", "global", "core.users", "delete", Effect::Allow);
			store.apply_atomic(&base, &[PolicyChange::add(row)]).await.unwrap();

			let revision = svc.reload(&store).await.unwrap();
			assert_ne!(revision, base);
			assert_eq!(svc.revision(), revision);
			assert!(svc.check(&cancel, &delete_users()).unwrap());
			assert_eq!(observer.reloads.load(Ordering::SeqCst), 1);
		}

		#[tokio::test]
		async fn captured_snapshot_survives_reload() {
			let store = MemoryPolicyStore::new(parse_policy_csv(POLICY).unwrap());
			let svc = AuthzService::from_store(&store, Arc::new(StaticModeProvider(Mode::Enforce)))
				.await
				.unwrap();
			let before = svc.current_snapshot();

			let base = svc.revision();
			let row = PolicyRow::policy("role:admin", "global", "core.users", "delete", Effect::Allow);
			store.apply_atomic(&base, &[PolicyChange::add(row)]).await.unwrap();
			svc.reload(&store).await.unwrap();

			assert!(!before.decide(&delete_users().normalized()).allowed);
			assert_eq!(before.revision(), base);
			assert!(svc.current_snapshot().decide(&delete_users()).allowed);
		}

		/// Reads from the inner store, then holds the first read until released.
		struct GatedStore {
			inner: MemoryPolicyStore,
			gate: tokio::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
			first_read: tokio::sync::Notify,
		}

		#[async_trait::async_trait]
		impl RevisionProvider for GatedStore {
			async fn current(&self) -> std::result::Result<PolicyRevision, StoreError> {
				self.inner.current().await
			}
		}

		#[async_trait::async_trait]
		impl PolicyStore for GatedStore {
			async fn snapshot(
				&self,
			) -> std::result::Result<(Vec<PolicyRow>, PolicyRevision), StoreError> {
				let snapshot = self.inner.snapshot().await?;
				let gate = self.gate.lock().await.take();
				if let Some(rx) = gate {
					self.first_read.notify_one();
					let _ = rx.await;
				}
				Ok(snapshot)
			}

			async fn apply_atomic(
				&self,
				base_revision: &str,
				changes: &[PolicyChange],
			) -> std::result::Result<PolicyRevision, StoreError> {
				self.inner.apply_atomic(base_revision, changes).await
			}
		}

		#[tokio::test]
		async fn concurrent_reloads_install_latest_revision() {
			let (release, gate) = tokio::sync::oneshot::channel();
			let store = Arc::new(GatedStore {
				inner: MemoryPolicyStore::new(parse_policy_csv(POLICY).unwrap()),
				gate: tokio::sync::Mutex::new(Some(gate)),
				first_read: tokio::sync::Notify::new(),
			});
			let svc = Arc::new(AuthzService::new(
				PolicySnapshot::build(Vec::new(), "r0"),
				Arc::new(StaticModeProvider(Mode::Enforce)),
			));

			let slow = {
				let (svc, store) = (svc.clone(), store.clone());
				tokio::spawn(async move { svc.reload(store.as_ref()).await })
			};
			store.first_read.notified().await;

			let base = store.current().await.unwrap().revision;
			let row = PolicyRow::policy("role:admin", "global", "core.users", "delete", Effect::Allow);
			let latest = store.apply_atomic(&base, &[PolicyChange::add(row)]).await.unwrap();

			let fast = {
				let (svc, store) = (svc.clone(), store.clone());
				tokio::spawn(async move { svc.reload(store.as_ref()).await })
			};
			tokio::task::yield_now().await;
			release.send(()).unwrap();

			assert_eq!(slow.await.unwrap().unwrap(), base);
			assert_eq!(fast.await.unwrap().unwrap(), latest.revision);
			assert_eq!(svc.revision(), latest.revision);
			assert!(svc.check(&CancellationToken::new(), &delete_users()).unwrap());
		}
	}
}
