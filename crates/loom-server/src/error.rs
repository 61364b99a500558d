// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Errors raised while assembling the server.
//!
//! Request-time failures are [`crate::api_response::ApiError`]; these cover
//! startup only.

use loom_authz_core::{AuthzError, StoreError};
use loom_common_routing::RoutingError;
use loom_common_webhook::ReplayError;
use loom_server_config::ConfigError;
use loom_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("database error: {0}")]
	Db(#[from] DbError),

	#[error("route allowlist error: {0}")]
	Routing(#[from] RoutingError),

	#[error("policy store error: {0}")]
	Store(#[from] StoreError),

	#[error("authorization service error: {0}")]
	Authz(#[from] AuthzError),

	#[error("webhook replay configuration error: {0}")]
	Replay(#[from] ReplayError),

	#[error("metrics registration failed: {0}")]
	Metrics(#[from] prometheus::Error),

	#[error("invalid ops guard configuration: {0}")]
	OpsGuard(String),
}
