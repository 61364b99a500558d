// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use uuid::Uuid;

use crate::policy_file::PolicyParseError;

/// Errors raised by policy stores and revision providers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("base revision mismatch: expected {expected}, current {current}")]
	RevisionMismatch { expected: String, current: String },

	#[error("policy apply failed: {0}")]
	ApplyFailed(String),

	#[error("policy revision unavailable: {0}")]
	RevisionUnavailable(String),

	#[error("failed to access {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	Parse(#[from] PolicyParseError),

	#[error("policy store backend error: {0}")]
	Backend(String),
}

impl StoreError {
	pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		StoreError::Io {
			path: path.into(),
			source,
		}
	}

	/// Stable short code, matching the naming used in API envelopes.
	pub fn code(&self) -> &'static str {
		match self {
			StoreError::RevisionMismatch { .. } => "revision_mismatch",
			StoreError::ApplyFailed(_) => "policy_apply_failed",
			StoreError::RevisionUnavailable(_) => "revision_unavailable",
			StoreError::Io { .. } | StoreError::Backend(_) => "policy_write_failed",
			StoreError::Parse(_) => "policy_parse_failed",
		}
	}
}

/// Errors raised by the authorization service.
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
	#[error("permission denied: {subject} cannot {action} {object} in {domain}")]
	Forbidden {
		subject: String,
		domain: String,
		object: String,
		action: String,
	},

	#[error("invalid authorization request: {0}")]
	InvalidRequest(String),

	#[error("authorization cancelled")]
	Cancelled,

	#[error(transparent)]
	Store(#[from] StoreError),
}

impl AuthzError {
	pub fn is_forbidden(&self) -> bool {
		matches!(self, AuthzError::Forbidden { .. })
	}
}

pub type Result<T> = std::result::Result<T, AuthzError>;

/// Errors raised by the stage store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
	#[error("{0} is required")]
	MissingField(&'static str),

	#[error("stage_kind must be add or remove")]
	InvalidStageKind,

	#[error("invalid {field}: {message}")]
	InvalidField {
		field: &'static str,
		message: String,
	},

	#[error("stage limit reached ({0})")]
	LimitReached(usize),

	#[error("stage entry not found")]
	NotFound(Uuid),

	#[error("stage payload is empty")]
	Empty,
}
