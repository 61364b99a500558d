// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-user staging of proposed policy changes.
//!
//! Staged entries live in process memory only and are lost on restart.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StageError;
use crate::store::{ChangeOp, PolicyChange};
use crate::types::{normalize_action, Effect, PolicyRow, PolicyType};

pub const DEFAULT_STAGE_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageKey {
	pub user_id: Uuid,
	pub tenant_id: Uuid,
}

impl StageKey {
	pub fn new(user_id: Uuid, tenant_id: Option<Uuid>) -> Self {
		Self {
			user_id,
			tenant_id: tenant_id.unwrap_or(Uuid::nil()),
		}
	}
}

pub type StageKind = ChangeOp;

/// Raw staging request as received from a form or JSON body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StagePayload {
	#[serde(rename = "type", default)]
	pub ptype: String,
	#[serde(default)]
	pub subject: String,
	#[serde(default)]
	pub domain: String,
	#[serde(default)]
	pub object: String,
	#[serde(default)]
	pub action: String,
	#[serde(default)]
	pub effect: String,
	#[serde(default)]
	pub stage_kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StagedEntry {
	pub id: Uuid,
	pub stage_kind: StageKind,
	#[serde(flatten)]
	pub row: PolicyRow,
}

impl StagedEntry {
	pub fn to_change(&self) -> PolicyChange {
		PolicyChange {
			op: self.stage_kind,
			row: self.row.clone(),
		}
	}
}

fn required(value: &str, field: &'static str) -> Result<(), StageError> {
	if value.trim().is_empty() {
		return Err(StageError::MissingField(field));
	}
	Ok(())
}

fn build_entry(payload: &StagePayload) -> Result<StagedEntry, StageError> {
	required(&payload.ptype, "type")?;
	required(&payload.object, "object")?;
	required(&payload.action, "action")?;
	required(&payload.effect, "effect")?;
	required(&payload.domain, "domain")?;

	let stage_kind = match payload.stage_kind.trim().to_ascii_lowercase().as_str() {
		"" | "add" => ChangeOp::Add,
		"remove" => ChangeOp::Remove,
		_ => return Err(StageError::InvalidStageKind),
	};
	let ptype: PolicyType = payload
		.ptype
		.parse()
		.map_err(|message| StageError::InvalidField {
			field: "type",
			message,
		})?;
	let effect: Effect = payload
		.effect
		.parse()
		.map_err(|message| StageError::InvalidField {
			field: "effect",
			message,
		})?;

	let row = PolicyRow {
		ptype,
		subject: payload.subject.clone(),
		domain: payload.domain.clone(),
		object: payload.object.clone(),
		action: normalize_action(&payload.action),
		effect,
	}
	.normalized();

	Ok(StagedEntry {
		id: Uuid::new_v4(),
		stage_kind,
		row,
	})
}

fn matches_filter(entry: &StagedEntry, subject: &str, domain: &str) -> bool {
	(subject.is_empty() || entry.row.subject == subject)
		&& (domain.is_empty() || entry.row.domain == domain)
}

#[derive(Debug)]
pub struct StageStore {
	limit: usize,
	entries: Mutex<HashMap<StageKey, Vec<StagedEntry>>>,
}

impl Default for StageStore {
	fn default() -> Self {
		Self::new(DEFAULT_STAGE_LIMIT)
	}
}

impl StageStore {
	pub fn new(limit: usize) -> Self {
		Self {
			limit,
			entries: Mutex::new(HashMap::new()),
		}
	}

	pub fn limit(&self) -> usize {
		self.limit
	}

	pub fn add(&self, key: StageKey, payload: StagePayload) -> Result<StagedEntry, StageError> {
		let mut added = self.add_many_with_ids(key, std::slice::from_ref(&payload))?;
		added.pop().ok_or(StageError::Empty)
	}

	/// Stage every payload or none of them. Returns the new entries.
	pub fn add_many_with_ids(
		&self,
		key: StageKey,
		payloads: &[StagePayload],
	) -> Result<Vec<StagedEntry>, StageError> {
		if payloads.is_empty() {
			return Err(StageError::Empty);
		}
		let built = payloads
			.iter()
			.map(build_entry)
			.collect::<Result<Vec<_>, _>>()?;

		let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
		let current = entries.entry(key).or_default();
		if current.len() + built.len() > self.limit {
			return Err(StageError::LimitReached(self.limit));
		}
		current.extend(built.iter().cloned());
		Ok(built)
	}

	pub fn delete(&self, key: StageKey, id: Uuid) -> Result<(), StageError> {
		self.delete_many(key, &[id]).map(|_| ())
	}

	/// Delete all `ids` or none. Returns the number of entries left.
	pub fn delete_many(&self, key: StageKey, ids: &[Uuid]) -> Result<usize, StageError> {
		let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
		let Some(current) = entries.get_mut(&key) else {
			return match ids.first() {
				Some(id) => Err(StageError::NotFound(*id)),
				None => Ok(0),
			};
		};
		for id in ids {
			if !current.iter().any(|e| e.id == *id) {
				return Err(StageError::NotFound(*id));
			}
		}
		let ids: HashSet<&Uuid> = ids.iter().collect();
		current.retain(|e| !ids.contains(&e.id));
		let remaining = current.len();
		if remaining == 0 {
			entries.remove(&key);
		}
		Ok(remaining)
	}

	/// Remove whichever of `ids` are still staged.
	pub fn discard(&self, key: StageKey, ids: &[Uuid]) {
		let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
		if let Some(current) = entries.get_mut(&key) {
			current.retain(|e| !ids.contains(&e.id));
			if current.is_empty() {
				entries.remove(&key);
			}
		}
	}

	/// Clear entries for `subject` and `domain`; both empty clears everything.
	/// Returns the number of entries left.
	pub fn clear(&self, key: StageKey, subject: &str, domain: &str) -> usize {
		let subject = subject.trim();
		let domain = domain.trim();
		let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
		if subject.is_empty() && domain.is_empty() {
			entries.remove(&key);
			return 0;
		}
		let Some(current) = entries.get_mut(&key) else {
			return 0;
		};
		current.retain(|e| !(e.row.subject == subject && e.row.domain == domain));
		let remaining = current.len();
		if remaining == 0 {
			entries.remove(&key);
		}
		remaining
	}

	/// Entries for `key`, filtered by exact subject/domain when non-empty.
	pub fn list(&self, key: StageKey, subject: &str, domain: &str) -> Vec<StagedEntry> {
		let subject = subject.trim();
		let domain = domain.trim();
		let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
		entries
			.get(&key)
			.map(|current| {
				current
					.iter()
					.filter(|e| matches_filter(e, subject, domain))
					.cloned()
					.collect()
			})
			.unwrap_or_default()
	}
}
