// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy persistence.
//!
//! A [`PolicyStore`] returns consistent `(rows, revision)` pairs and applies
//! change sets atomically against a base revision. Every successful apply
//! produces a new revision token.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::StoreError;
use crate::policy_file::{parse_policy_csv, write_policy_csv};
use crate::revision::{revision_path_for, FileRevisionProvider, PolicyRevision, RevisionProvider};
use crate::types::PolicyRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
	Add,
	Remove,
}

impl ChangeOp {
	pub fn as_str(&self) -> &'static str {
		match self {
			ChangeOp::Add => "add",
			ChangeOp::Remove => "remove",
		}
	}

	pub fn inverse(&self) -> ChangeOp {
		match self {
			ChangeOp::Add => ChangeOp::Remove,
			ChangeOp::Remove => ChangeOp::Add,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PolicyChange {
	pub op: ChangeOp,
	pub row: PolicyRow,
}

impl PolicyChange {
	pub fn add(row: PolicyRow) -> Self {
		Self {
			op: ChangeOp::Add,
			row,
		}
	}

	pub fn remove(row: PolicyRow) -> Self {
		Self {
			op: ChangeOp::Remove,
			row,
		}
	}

	/// The change that undoes this one.
	pub fn inverse(&self) -> Self {
		Self {
			op: self.op.inverse(),
			row: self.row.clone(),
		}
	}
}

/// Apply `changes` to `rows` by value.
///
/// Fails without partial effect when a row is invalid, an add duplicates a
/// present row, or a remove names an absent row.
pub fn apply_changes(rows: &[PolicyRow], changes: &[PolicyChange]) -> Result<Vec<PolicyRow>, StoreError> {
	if changes.is_empty() {
		return Err(StoreError::ApplyFailed("change set is empty".to_string()));
	}

	let mut present: HashSet<PolicyRow> = rows.iter().cloned().collect();
	let mut removed: HashSet<PolicyRow> = HashSet::new();
	let mut added: Vec<PolicyRow> = Vec::new();

	for change in changes {
		let row = change.row.clone().normalized();
		row.validate().map_err(StoreError::ApplyFailed)?;
		match change.op {
			ChangeOp::Add => {
				if !present.insert(row.clone()) {
					return Err(StoreError::ApplyFailed(format!(
						"duplicate policy: {}",
						row.descriptor()
					)));
				}
				if !removed.remove(&row) {
					added.push(row);
				}
			}
			ChangeOp::Remove => {
				if !present.remove(&row) {
					return Err(StoreError::ApplyFailed(format!(
						"policy not found: {}",
						row.descriptor()
					)));
				}
				if let Some(pos) = added.iter().position(|r| r == &row) {
					added.remove(pos);
				} else {
					removed.insert(row);
				}
			}
		}
	}

	let mut next: Vec<PolicyRow> = rows.iter().filter(|r| !removed.contains(*r)).cloned().collect();
	next.extend(added);
	Ok(next)
}

#[async_trait]
pub trait PolicyStore: RevisionProvider {
	/// Current rows together with the revision they belong to.
	async fn snapshot(&self) -> Result<(Vec<PolicyRow>, PolicyRevision), StoreError>;

	/// Apply `changes` if the current revision equals `base_revision`.
	async fn apply_atomic(
		&self,
		base_revision: &str,
		changes: &[PolicyChange],
	) -> Result<PolicyRevision, StoreError>;
}

/// Store kept entirely in memory.
#[derive(Debug)]
pub struct MemoryPolicyStore {
	state: RwLock<(Vec<PolicyRow>, PolicyRevision)>,
}

impl MemoryPolicyStore {
	pub fn new(rows: Vec<PolicyRow>) -> Self {
		Self {
			state: RwLock::new((rows, PolicyRevision::fresh())),
		}
	}
}

impl Default for MemoryPolicyStore {
	fn default() -> Self {
		Self::new(Vec::new())
	}
}

#[async_trait]
impl RevisionProvider for MemoryPolicyStore {
	async fn current(&self) -> Result<PolicyRevision, StoreError> {
		Ok(self.state.read().await.1.clone())
	}
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
	async fn snapshot(&self) -> Result<(Vec<PolicyRow>, PolicyRevision), StoreError> {
		let state = self.state.read().await;
		Ok((state.0.clone(), state.1.clone()))
	}

	#[instrument(skip(self, changes), fields(base_revision = %base_revision, changes = changes.len()))]
	async fn apply_atomic(
		&self,
		base_revision: &str,
		changes: &[PolicyChange],
	) -> Result<PolicyRevision, StoreError> {
		let mut state = self.state.write().await;
		if state.1.revision != base_revision {
			return Err(StoreError::RevisionMismatch {
				expected: base_revision.to_string(),
				current: state.1.revision.clone(),
			});
		}
		let next = apply_changes(&state.0, changes)?;
		let mut revision = PolicyRevision::fresh();
		while revision.revision == state.1.revision {
			revision = PolicyRevision::fresh();
		}
		*state = (next, revision.clone());
		Ok(revision)
	}
}

/// Store backed by a CSV policy file and its adjacent `.rev` file.
///
/// Writes are serialized. Each file is written to a temporary sibling and
/// renamed into place, policy first, then revision.
#[derive(Debug)]
pub struct FilePolicyStore {
	policy_path: PathBuf,
	revision: FileRevisionProvider,
	write_lock: Mutex<()>,
}

impl FilePolicyStore {
	/// Open the store, creating the revision file when it is missing.
	pub async fn open(policy_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let policy_path = policy_path.into();
		if tokio::fs::metadata(&policy_path).await.is_err() {
			return Err(StoreError::io(
				&policy_path,
				std::io::Error::new(std::io::ErrorKind::NotFound, "policy file not found"),
			));
		}

		let rev_path = revision_path_for(&policy_path);
		if tokio::fs::metadata(&rev_path).await.is_err() {
			let token = PolicyRevision::fresh().revision;
			write_atomically(&rev_path, format!("{token}\n").as_bytes()).await?;
			info!(path = %rev_path.display(), revision = %token, "created policy revision file");
		}

		Ok(Self {
			revision: FileRevisionProvider::new(rev_path),
			policy_path,
			write_lock: Mutex::new(()),
		})
	}

	pub fn policy_path(&self) -> &Path {
		&self.policy_path
	}

	async fn read_rows(&self) -> Result<Vec<PolicyRow>, StoreError> {
		let raw = tokio::fs::read_to_string(&self.policy_path)
			.await
			.map_err(|e| StoreError::io(&self.policy_path, e))?;
		Ok(parse_policy_csv(&raw)?)
	}
}

async fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
	let mut tmp_name = path.as_os_str().to_owned();
	tmp_name.push(format!(".tmp-{}", Uuid::new_v4().simple()));
	let tmp = PathBuf::from(tmp_name);

	tokio::fs::write(&tmp, contents)
		.await
		.map_err(|e| StoreError::io(&tmp, e))?;
	if let Err(e) = tokio::fs::rename(&tmp, path).await {
		let _ = tokio::fs::remove_file(&tmp).await;
		return Err(StoreError::io(path, e));
	}
	Ok(())
}

#[async_trait]
impl RevisionProvider for FilePolicyStore {
	async fn current(&self) -> Result<PolicyRevision, StoreError> {
		self.revision.current().await
	}
}

#[async_trait]
impl PolicyStore for FilePolicyStore {
	async fn snapshot(&self) -> Result<(Vec<PolicyRow>, PolicyRevision), StoreError> {
		// writers hold the lock across both renames
		let _guard = self.write_lock.lock().await;
		let revision = self.revision.current().await?;
		let rows = self.read_rows().await?;
		Ok((rows, revision))
	}

	#[instrument(
		skip(self, changes),
		fields(path = %self.policy_path.display(), base_revision = %base_revision, changes = changes.len())
	)]
	async fn apply_atomic(
		&self,
		base_revision: &str,
		changes: &[PolicyChange],
	) -> Result<PolicyRevision, StoreError> {
		let _guard = self.write_lock.lock().await;

		self.revision.invalidate();
		let current = self.revision.current().await?;
		if current.revision != base_revision {
			return Err(StoreError::RevisionMismatch {
				expected: base_revision.to_string(),
				current: current.revision,
			});
		}

		let rows = self.read_rows().await?;
		let next = apply_changes(&rows, changes)?;

		let mut revision = PolicyRevision::fresh();
		while revision.revision == current.revision {
			revision = PolicyRevision::fresh();
		}
		let header = format!("revision: {}", revision.revision);
		write_atomically(
			&self.policy_path,
			write_policy_csv(&next, Some(&header)).as_bytes(),
		)
		.await?;
		write_atomically(
			self.revision.path(),
			format!("{}\n", revision.revision).as_bytes(),
		)
		.await?;
		self.revision.invalidate();

		info!(revision = %revision.revision, rows = next.len(), "policy file written");
		Ok(revision)
	}
}
