// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Router fallbacks for unknown paths and unsupported methods.

use axum::{extract::Request, response::Response};
use loom_common_routing::RouteClass;

use crate::api_response::ApiError;

fn class_of(req: &Request) -> RouteClass {
	req.extensions()
		.get::<RouteClass>()
		.copied()
		.unwrap_or(RouteClass::Ui)
}

pub async fn not_found(req: Request) -> Response {
	ApiError::not_found(req.uri().path()).into_class_response(class_of(&req))
}

pub async fn method_not_allowed(req: Request) -> Response {
	ApiError::method_not_allowed(req.uri().path(), req.method().as_str())
		.into_class_response(class_of(&req))
}
