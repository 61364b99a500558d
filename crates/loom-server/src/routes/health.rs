// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Health, metrics and API description handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::{api::AppState, api_docs::ApiDoc, api_response::ApiError};

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
	pub status: &'static str,
	/// Revision of the policy snapshot currently serving decisions.
	pub revision: String,
	pub mode: String,
	pub version: &'static str,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    ),
    tag = "health"
)]
/// GET /health - Liveness plus the active policy revision and mode.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
	Json(HealthResponse {
		status: "ok",
		revision: state.authz.revision().to_string(),
		mode: state.authz.mode().as_str().to_string(),
		version: env!("CARGO_PKG_VERSION"),
	})
}

#[utoipa::path(
    get,
    path = "/debug/prometheus",
    responses(
        (status = 200, description = "Prometheus metrics", content_type = "text/plain")
    ),
    tag = "health"
)]
/// GET /debug/prometheus - Prometheus metrics export endpoint.
///
/// Includes decision counters by mode and result, debug inspection counters
/// and latency, and snapshot reload counts.
pub async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
	match state.metrics.gather_metrics() {
		Ok(metrics) => {
			tracing::debug!("prometheus_metrics: gathering metrics");
			Ok((
				StatusCode::OK,
				[(
					axum::http::header::CONTENT_TYPE,
					"text/plain; version=0.0.4; charset=utf-8",
				)],
				metrics,
			))
		}
		Err(e) => {
			tracing::error!(error = %e, "prometheus_metrics: failed to gather metrics");
			Err(ApiError::new(
				StatusCode::INTERNAL_SERVER_ERROR,
				"METRICS_ERROR",
				format!("failed to gather metrics: {e}"),
			))
		}
	}
}

#[utoipa::path(
    get,
    path = "/core/api/authz/openapi.json",
    responses(
        (status = 200, description = "OpenAPI document", content_type = "application/json")
    ),
    tag = "health"
)]
/// GET /core/api/authz/openapi.json - Machine-readable API description.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
	Json(ApiDoc::openapi())
}
