// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Loom authorization server.
//!
//! This crate wires the policy engine, the draft workflow and the
//! classifier-driven middleware pack into an axum router.

pub mod api;
pub mod api_docs;
pub mod api_response;
pub mod context;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod version;

pub use api::{create_app_state, create_app_state_with, create_router, AppState};
pub use api_docs::ApiDoc;
pub use api_response::ApiError;
pub use context::RequestCtx;
pub use error::ServerError;
pub use loom_server_config::ServerConfig;
pub use metrics::AuthzMetrics;
pub use rate_limit::RateLimiter;
