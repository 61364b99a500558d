// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! One authorization view state per request.
//!
//! [`attach_view_state`] puts an empty [`ViewStateSlot`] into the request
//! extensions. Every [`RequestCtx::authorize`](crate::context::RequestCtx::authorize)
//! in the request records into that slot, and the final
//! [`ViewStateSnapshot`] is attached to the response extensions for the
//! presentation layer.

use std::sync::{Arc, Mutex, PoisonError};

use axum::{extract::Request, middleware::Next, response::Response};
use loom_authz_core::{ViewState, ViewStateSnapshot};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ViewStateSlot(Arc<Mutex<Option<ViewState>>>);

impl ViewStateSlot {
	/// Run `f` on the request's view state, creating it on first use.
	pub fn with<R>(&self, tenant_id: Option<Uuid>, subject: &str, f: impl FnOnce(&mut ViewState) -> R) -> R {
		let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
		f(ViewState::ensure(&mut *slot, tenant_id, subject))
	}

	pub fn snapshot(&self) -> Option<ViewStateSnapshot> {
		self.0
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.as_ref()
			.map(ViewState::snapshot)
	}
}

pub async fn attach_view_state(mut req: Request, next: Next) -> Response {
	let slot = ViewStateSlot::default();
	req.extensions_mut().insert(slot.clone());

	let mut response = next.run(req).await;
	if let Some(snapshot) = slot.snapshot() {
		tracing::debug!(
			subject = %snapshot.subject,
			capabilities = snapshot.capabilities.len(),
			missing = snapshot.missing_policies.len(),
			"request view state"
		);
		response.extensions_mut().insert(snapshot);
	}
	response
}
