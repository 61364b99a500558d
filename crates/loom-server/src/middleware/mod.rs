// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Classifier-driven middleware.
//!
//! Registration order, outermost first:
//!
//! 1. [`classify`] attaches the [`RouteClass`](loom_common_routing::RouteClass)
//! 2. [`request_logger`] assigns the request id and recovers panics
//! 3. [`hide_disabled_routes`] hides dev-only and test routes
//! 4. [`ops_guard`] protects `ops` routes in production
//! 5. [`webhook_replay`] drops duplicate webhook deliveries
//! 6. [`resolve_tenant`] maps the host to a tenant
//! 7. [`attach_view_state`] gives the request one authorization view state
//!
//! [`not_found`] and [`method_not_allowed`] are router fallbacks.

pub mod classify;
pub mod not_found;
pub mod ops_guard;
pub mod request_logger;
pub mod tenant;
pub mod view_state;
pub mod webhook_replay;

pub use classify::{classify, hide_disabled_routes, RouteGate};
pub use not_found::{method_not_allowed, not_found};
pub use ops_guard::{ops_guard, OpsGuard, OPS_TOKEN_HEADER};
pub use request_logger::{request_logger, REQUEST_ID_HEADER};
pub use tenant::{normalize_host, resolve_tenant};
pub use view_state::{attach_view_state, ViewStateSlot};
pub use webhook_replay::webhook_replay;
