// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! OpenAPI documentation for the authorization API.
//!
//! Served as JSON at `/core/api/authz/openapi.json`.

use utoipa::OpenApi;

use loom_authz_core::{Effect, Mode, PolicyRow, PolicyType, StagePayload, StagedEntry};
use loom_server_authz::{ApplyOutcome, ApplyRequest};
use loom_server_db::{PolicyChangeRequest, PolicyDraftStatus};

use crate::{
	api_response::ErrorEnvelope,
	routes::{authz, health, requests},
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Loom Authorization API",
        version = "1.0.0",
        description = "Policy inspection, staging, change requests and decision debugging.",
        license(name = "Proprietary"),
        contact(
            name = "Geoffrey Huntley",
            email = "ghuntley@ghuntley.com",
            url = "https://ghuntley.com"
        )
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    tags(
        (name = "authz", description = "Active policy listing, staging, apply and decision debugging"),
        (name = "authz-requests", description = "Policy change request workflow"),
        (name = "health", description = "Health checks, metrics and API description")
    ),
    paths(
        authz::list_policies,
        authz::list_stage,
        authz::stage_policies,
        authz::delete_stage,
        authz::apply_policies,
        authz::debug_authz,
        requests::list_requests,
        requests::get_request,
        requests::create_request,
        requests::approve_request,
        requests::reject_request,
        requests::cancel_request,
        requests::submit_request,
        requests::retry_request,
        requests::trigger_bot_request,
        requests::revert_request,
        requests::apply_request,
        health::health_check,
        health::prometheus_metrics,
        health::openapi_json,
    ),
    components(
        schemas(
            authz::PolicyListResponse,
            authz::StageBody,
            authz::StageResponse,
            authz::StageDeleteBody,
            authz::DebugResponse,
            authz::DebugRequestView,
            authz::DebugTrace,
            requests::DraftListResponse,
            requests::CreateRequestBody,
            health::HealthResponse,
            ErrorEnvelope,
            PolicyRow,
            PolicyType,
            Effect,
            Mode,
            StagePayload,
            StagedEntry,
            ApplyRequest,
            ApplyOutcome,
            PolicyChangeRequest,
            PolicyDraftStatus,
        )
    )
)]
pub struct ApiDoc;
