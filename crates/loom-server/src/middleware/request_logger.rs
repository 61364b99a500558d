// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Request id propagation, completion logging and panic recovery.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::Once;
use std::time::Instant;

use axum::{
	extract::Request,
	http::HeaderValue,
	middleware::Next,
	response::Response,
};
use futures::FutureExt;
use loom_common_routing::RouteClass;
use tracing::{error, info};
use uuid::Uuid;

use crate::{api_response::ApiError, context::RequestId};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

thread_local! {
	/// Backtrace of the most recent panic on this thread, taken at the panic site.
	static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static BACKTRACE_HOOK: Once = Once::new();

/// Chain a panic hook that records where the panic happened.
///
/// The handler future is polled on the panicking thread, so the recovery
/// path reads the backtrace back from the same thread-local.
fn install_backtrace_hook() {
	BACKTRACE_HOOK.call_once(|| {
		let previous = std::panic::take_hook();
		std::panic::set_hook(Box::new(move |info| {
			PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
			previous(info);
		}));
	});
}

fn take_panic_backtrace() -> Option<Backtrace> {
	PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

pub async fn request_logger(mut req: Request, next: Next) -> Response {
	install_backtrace_hook();
	let start = Instant::now();
	let request_id = req
		.headers()
		.get(REQUEST_ID_HEADER)
		.and_then(|v| v.to_str().ok())
		.map(str::trim)
		.filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
		.map(str::to_string)
		.unwrap_or_else(|| Uuid::new_v4().to_string());
	let class = req
		.extensions()
		.get::<RouteClass>()
		.copied()
		.unwrap_or(RouteClass::Ui);
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	req.extensions_mut().insert(RequestId(request_id.clone()));

	let mut response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
		Ok(response) => response,
		Err(payload) => {
			let backtrace = take_panic_backtrace()
				.map(|b| b.to_string())
				.unwrap_or_else(|| "unavailable".to_string());
			error!(
				request_id = %request_id,
				method = %method,
				path = %path,
				route_class = %class,
				panic = %panic_message(payload.as_ref()),
				backtrace = %backtrace,
				"request handler panicked"
			);
			ApiError::internal(&path, &request_id).into_class_response(class)
		}
	};

	if let Ok(value) = HeaderValue::from_str(&request_id) {
		response.headers_mut().insert(REQUEST_ID_HEADER, value);
	}

	info!(
		request_id = %request_id,
		method = %method,
		path = %path,
		route_class = %class,
		status = response.status().as_u16(),
		latency_ms = start.elapsed().as_secs_f64() * 1000.0,
		"request completed"
	);
	response
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		return (*s).to_string();
	}
	if let Some(s) = payload.downcast_ref::<String>() {
		return s.clone();
	}
	"unknown panic".to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::{body::Body, http::StatusCode, middleware::from_fn, routing::get, Extension, Router};
	use tower::ServiceExt;

	async fn boom() -> &'static str {
		panic!("kaboom")
	}

	fn app(class: RouteClass) -> Router {
		Router::new()
			.route("/ok", get(|| async { "ok" }))
			.route("/boom", get(boom))
			.layer(from_fn(request_logger))
			.layer(Extension(class))
	}

	async fn body_string(response: Response) -> String {
		let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
			.await
			.unwrap();
		String::from_utf8_lossy(&bytes).to_string()
	}

	#[tokio::test]
	async fn test_request_id_is_propagated() {
		let response = app(RouteClass::Ui)
			.oneshot(
				Request::get("/ok")
					.header(REQUEST_ID_HEADER, "abc-123")
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc-123");
	}

	#[tokio::test]
	async fn test_request_id_is_generated() {
		let response = app(RouteClass::Ui)
			.oneshot(Request::get("/ok").body(Body::empty()).unwrap())
			.await
			.unwrap();
		let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
		assert!(Uuid::parse_str(id).is_ok());
	}

	#[tokio::test]
	async fn test_panic_on_api_route_returns_envelope() {
		let response = app(RouteClass::InternalApi)
			.oneshot(
				Request::get("/boom")
					.header(REQUEST_ID_HEADER, "req-9")
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
		let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
		assert_eq!(body["code"], "INTERNAL_SERVER_ERROR");
		assert_eq!(body["meta"]["request_id"], "req-9");
		assert_eq!(body["meta"]["path"], "/boom");
	}

	#[tokio::test]
	async fn test_panic_on_page_route_returns_text() {
		let response = app(RouteClass::Ui)
			.oneshot(Request::get("/boom").body(Body::empty()).unwrap())
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(body_string(response).await, "internal server error");
	}

	#[test]
	fn test_backtrace_is_recorded_at_panic_site() {
		install_backtrace_hook();
		let _ = take_panic_backtrace();

		let caught = std::panic::catch_unwind(|| panic!("recorded"));
		assert!(caught.is_err());
		assert!(take_panic_backtrace().is_some());
		assert!(take_panic_backtrace().is_none());
	}
}
