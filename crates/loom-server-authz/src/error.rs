// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_authz_core::StoreError;
use loom_server_db::{DbError, PolicyDraftStatus};
use thiserror::Error;

pub type DraftResult<T> = Result<T, DraftError>;
pub type ApplyResult<T> = Result<T, ApplyError>;

#[derive(Error, Debug)]
pub enum DraftError {
	#[error("policy change request not found")]
	NotFound,

	#[error("invalid diff: {0}")]
	InvalidDiff(String),

	#[error("base revision mismatch (current {current})")]
	RevisionMismatch { current: String },

	#[error("invalid status transition from {from} to {to}")]
	InvalidStatusTransition {
		from: PolicyDraftStatus,
		to: PolicyDraftStatus,
	},

	#[error("policy change request belongs to another tenant")]
	TenantMismatch,

	#[error("policy change request has no applied snapshot")]
	MissingSnapshot,

	#[error("invalid parameters: {0}")]
	InvalidParams(String),

	#[error("revision unavailable: {0}")]
	Revision(#[from] StoreError),

	#[error(transparent)]
	Repository(DbError),
}

impl DraftError {
	pub fn code(&self) -> &'static str {
		match self {
			DraftError::NotFound => "not_found",
			DraftError::InvalidDiff(_) => "invalid_diff",
			DraftError::RevisionMismatch { .. } => "revision_mismatch",
			DraftError::InvalidStatusTransition { .. } => "invalid_status_transition",
			DraftError::TenantMismatch => "tenant_mismatch",
			DraftError::MissingSnapshot => "missing_snapshot",
			DraftError::InvalidParams(_) => "invalid_params",
			DraftError::Revision(_) | DraftError::Repository(_) => "repository",
		}
	}
}

impl From<DbError> for DraftError {
	fn from(e: DbError) -> Self {
		match e {
			DbError::NotFound(_) => DraftError::NotFound,
			other => DraftError::Repository(other),
		}
	}
}

#[derive(Error, Debug)]
pub enum ApplyError {
	#[error("no staged changes to apply")]
	StageEmpty,

	#[error("base_revision is required")]
	MissingBaseRevision,

	#[error("invalid change: {0}")]
	InvalidChange(String),

	#[error("base revision mismatch (current {current})")]
	RevisionMismatch { current: String },

	#[error("policy apply failed: {0}")]
	ApplyFailed(String),

	#[error("policy write failed: {0}")]
	WriteFailed(String),

	#[error("policy change request is locked by another worker")]
	Locked,

	#[error("apply cancelled")]
	Cancelled,

	#[error(transparent)]
	Draft(#[from] DraftError),
}

impl From<StoreError> for ApplyError {
	fn from(e: StoreError) -> Self {
		match e {
			StoreError::RevisionMismatch { current, .. } => ApplyError::RevisionMismatch { current },
			StoreError::ApplyFailed(message) => ApplyError::ApplyFailed(message),
			other => ApplyError::WriteFailed(other.to_string()),
		}
	}
}
