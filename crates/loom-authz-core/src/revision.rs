// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy revisions.
//!
//! A revision token is opaque; equality is the only supported comparison.
//! Writers mint tokens with [`new_revision_token`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PolicyRevision {
	pub revision: String,
	pub applied_at: DateTime<Utc>,
}

impl PolicyRevision {
	pub fn new(revision: impl Into<String>) -> Self {
		Self {
			revision: revision.into(),
			applied_at: Utc::now(),
		}
	}

	pub fn fresh() -> Self {
		Self::new(new_revision_token())
	}
}

/// `r<unix_millis>-<8 hex>`.
pub fn new_revision_token() -> String {
	let suffix = Uuid::new_v4().simple().to_string();
	format!("r{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

#[async_trait]
pub trait RevisionProvider: Send + Sync {
	async fn current(&self) -> Result<PolicyRevision, StoreError>;
}

#[derive(Debug, Deserialize)]
struct RevisionDocument {
	revision: String,
	#[serde(default)]
	generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct CachedRevision {
	modified: SystemTime,
	len: u64,
	value: PolicyRevision,
}

/// Reads the revision from a `<policy>.rev` file.
///
/// The file holds the token as plain text; a JSON document with a
/// `revision` field is accepted as well. The parsed value is cached until the
/// file's modification time or length changes.
#[derive(Debug)]
pub struct FileRevisionProvider {
	path: PathBuf,
	cache: Mutex<Option<CachedRevision>>,
}

impl FileRevisionProvider {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			cache: Mutex::new(None),
		}
	}

	/// Revision file adjacent to `policy_path`.
	pub fn for_policy(policy_path: &Path) -> Self {
		Self::new(revision_path_for(policy_path))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub(crate) fn invalidate(&self) {
		*self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
	}

	fn parse(raw: &str, modified: SystemTime) -> Result<PolicyRevision, StoreError> {
		let trimmed = raw.trim();
		if trimmed.starts_with('{') {
			let doc: RevisionDocument = serde_json::from_str(trimmed)
				.map_err(|e| StoreError::RevisionUnavailable(format!("invalid revision document: {e}")))?;
			let revision = doc.revision.trim().to_string();
			if revision.is_empty() {
				return Err(StoreError::RevisionUnavailable(
					"revision field is empty".to_string(),
				));
			}
			return Ok(PolicyRevision {
				revision,
				applied_at: doc.generated_at.unwrap_or_else(|| modified.into()),
			});
		}

		let token = trimmed
			.lines()
			.map(str::trim)
			.find(|l| !l.is_empty())
			.unwrap_or_default();
		if token.is_empty() {
			return Err(StoreError::RevisionUnavailable(
				"revision file is empty".to_string(),
			));
		}
		Ok(PolicyRevision {
			revision: token.to_string(),
			applied_at: modified.into(),
		})
	}
}

pub(crate) fn revision_path_for(policy_path: &Path) -> PathBuf {
	let mut name = policy_path.as_os_str().to_owned();
	name.push(".rev");
	PathBuf::from(name)
}

#[async_trait]
impl RevisionProvider for FileRevisionProvider {
	async fn current(&self) -> Result<PolicyRevision, StoreError> {
		let meta = tokio::fs::metadata(&self.path)
			.await
			.map_err(|e| StoreError::RevisionUnavailable(format!("{}: {e}", self.path.display())))?;
		let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
		let len = meta.len();

		{
			let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
			if let Some(cached) = cache.as_ref() {
				if cached.modified == modified && cached.len == len {
					return Ok(cached.value.clone());
				}
			}
		}

		let raw = tokio::fs::read_to_string(&self.path)
			.await
			.map_err(|e| StoreError::io(&self.path, e))?;
		let value = Self::parse(&raw, modified)?;

		*self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedRevision {
			modified,
			len,
			value: value.clone(),
		});
		Ok(value)
	}
}
