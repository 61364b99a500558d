// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
	#[error("routing allowlist not found: {0}")]
	AllowlistNotFound(PathBuf),

	#[error("failed to read allowlist {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse allowlist: {0}")]
	Parse(#[from] serde_yaml::Error),

	#[error("unsupported allowlist version: {0}")]
	UnsupportedVersion(u32),

	#[error("entrypoint {0:?} not found in allowlist")]
	EntrypointNotFound(String),

	#[error("allowlist rule[{index}]: empty prefix")]
	EmptyPrefix { index: usize },

	#[error("allowlist rule[{index}]: prefix must start with '/': {prefix:?}")]
	InvalidPrefix { index: usize, prefix: String },

	#[error("allowlist rule[{index}]: unknown class: {class:?}")]
	UnknownClass { index: usize, class: String },
}

pub type Result<T> = std::result::Result<T, RoutingError>;
