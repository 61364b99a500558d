// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Replay protection for webhook deliveries.

use std::sync::Arc;

use axum::{
	body::Body,
	extract::{Request, State},
	http::{header, Method, StatusCode},
	middleware::Next,
	response::{IntoResponse, Response},
	Json,
};
use futures::StreamExt;
use loom_common_routing::RouteClass;
use loom_common_webhook::{check_body_size, replay_key, ReplayCache};
use serde_json::json;
use tracing::{debug, warn};

use crate::api_response::ApiError;

fn payload_too_large(limit: usize) -> Response {
	ApiError::new(
		StatusCode::PAYLOAD_TOO_LARGE,
		"WEBHOOK_PAYLOAD_TOO_LARGE",
		format!("webhook payload exceeds {limit} bytes"),
	)
	.with_meta("limit", limit)
	.into_response()
}

fn bad_request(message: String) -> Response {
	ApiError::new(StatusCode::BAD_REQUEST, "WEBHOOK_BAD_REQUEST", message).into_response()
}

pub async fn webhook_replay(State(cache): State<Arc<ReplayCache>>, req: Request, next: Next) -> Response {
	let class = req.extensions().get::<RouteClass>().copied();
	if class != Some(RouteClass::Webhook) || req.method() != Method::POST {
		return next.run(req).await;
	}

	let limit = cache.config().max_body_bytes;
	let declared = req
		.headers()
		.get(header::CONTENT_LENGTH)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.parse::<usize>().ok());
	if let Some(len) = declared {
		if check_body_size(len, limit).is_err() {
			warn!(path = %req.uri().path(), len, "webhook payload rejected by content length");
			return payload_too_large(limit);
		}
	}

	let (parts, body) = req.into_parts();
	let mut stream = body.into_data_stream();
	let mut buf: Vec<u8> = Vec::new();
	while let Some(chunk) = stream.next().await {
		let chunk = match chunk {
			Ok(chunk) => chunk,
			Err(e) => return bad_request(format!("failed to read webhook body: {e}")),
		};
		if check_body_size(buf.len() + chunk.len(), limit).is_err() {
			warn!(path = %parts.uri.path(), "webhook payload exceeded limit while streaming");
			return payload_too_large(limit);
		}
		buf.extend_from_slice(&chunk);
	}

	let path = parts.uri.path().to_string();
	let key = replay_key(&path, &buf);
	if cache.is_seen(&key) {
		debug!(path = %path, "duplicate webhook delivery acknowledged");
		return (StatusCode::OK, Json(json!({ "status": "duplicate" }))).into_response();
	}

	let response = next.run(Request::from_parts(parts, Body::from(buf))).await;
	if response.status().is_success() {
		cache.mark(&key);
	}
	response
}
