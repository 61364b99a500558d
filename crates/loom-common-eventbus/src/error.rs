// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::bus::HandlerError;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
	#[error("eventbus: no subscribers for event")]
	NoSubscribers,

	#[error("eventbus: handler {handler} panicked: {message}")]
	HandlerPanicked {
		handler: &'static str,
		message: String,
	},

	#[error("eventbus: handler {handler} failed: {source}")]
	HandlerFailed {
		handler: &'static str,
		#[source]
		source: HandlerError,
	},

	#[error("eventbus: {} handlers failed: {}", .0.len(), join_errors(.0))]
	Multiple(Vec<EventBusError>),
}

impl EventBusError {
	/// Stable machine-readable code for the error.
	pub fn code(&self) -> &'static str {
		match self {
			EventBusError::NoSubscribers => "EVENTBUS_NO_SUBSCRIBERS",
			EventBusError::HandlerPanicked { .. } => "EVENTBUS_HANDLER_PANIC",
			EventBusError::HandlerFailed { .. } => "EVENTBUS_HANDLER_ERROR",
			EventBusError::Multiple(_) => "EVENTBUS_MULTIPLE_ERRORS",
		}
	}
}

fn join_errors(errors: &[EventBusError]) -> String {
	errors
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join("; ")
}

pub type Result<T> = std::result::Result<T, EventBusError>;
