// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-request record of evaluated capabilities.
//!
//! Presentation code reads [`ViewState::can_authz`] to decide whether to show
//! an affordance. It is a cache of decisions already made during the
//! request; handlers still authorize on their own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{capability_key, domain_from_tenant, normalize_action, Effect};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MissingPolicy {
	pub domain: String,
	pub object: String,
	pub action: String,
}

/// A `p` row that would grant a missing policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PolicySuggestion {
	pub subject: String,
	pub domain: String,
	pub object: String,
	pub action: String,
	pub effect: Effect,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
	subject: String,
	tenant: String,
	capabilities: BTreeMap<String, bool>,
	missing: Vec<MissingPolicy>,
}

/// Serializable copy of a [`ViewState`] handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ViewStateSnapshot {
	pub subject: String,
	pub tenant: String,
	pub capabilities: BTreeMap<String, bool>,
	pub missing_policies: Vec<MissingPolicy>,
}

fn normalize_key(key: &str) -> String {
	key.trim().to_lowercase()
}

impl ViewState {
	pub fn new(subject: impl Into<String>, tenant: impl Into<String>) -> Self {
		Self {
			subject: subject.into(),
			tenant: tenant.into(),
			..Default::default()
		}
	}

	/// Return the view state in `slot`, creating it for `tenant_id` and
	/// `subject` when absent.
	pub fn ensure<'a>(
		slot: &'a mut Option<ViewState>,
		tenant_id: Option<Uuid>,
		subject: &str,
	) -> &'a mut ViewState {
		slot.get_or_insert_with(|| ViewState::new(subject, domain_from_tenant(tenant_id)))
	}

	pub fn subject(&self) -> &str {
		&self.subject
	}

	pub fn tenant(&self) -> &str {
		&self.tenant
	}

	pub fn set_capability(&mut self, key: &str, allowed: bool) {
		self.capabilities.insert(normalize_key(key), allowed);
	}

	pub fn capability_value(&self, key: &str) -> Option<bool> {
		self.capabilities.get(&normalize_key(key)).copied()
	}

	/// `false` unless the capability was recorded as allowed.
	pub fn capability(&self, key: &str) -> bool {
		self.capability_value(key).unwrap_or(false)
	}

	pub fn can_authz(&self, object: &str, action: &str) -> bool {
		self.capability(&capability_key(object, action))
	}

	pub fn add_missing_policy(&mut self, domain: &str, object: &str, action: &str) {
		let policy = MissingPolicy {
			domain: domain.trim().to_string(),
			object: object.trim().to_lowercase(),
			action: normalize_action(action),
		};
		if !self.missing.contains(&policy) {
			self.missing.push(policy);
		}
	}

	pub fn missing_policies(&self) -> &[MissingPolicy] {
		&self.missing
	}

	/// One `allow` suggestion per missing policy, for the current subject.
	pub fn suggest_diff(&self) -> Vec<PolicySuggestion> {
		self
			.missing
			.iter()
			.map(|m| PolicySuggestion {
				subject: self.subject.clone(),
				domain: m.domain.clone(),
				object: m.object.clone(),
				action: m.action.clone(),
				effect: Effect::Allow,
			})
			.collect()
	}

	pub fn snapshot(&self) -> ViewStateSnapshot {
		ViewStateSnapshot {
			subject: self.subject.clone(),
			tenant: self.tenant.clone(),
			capabilities: self.capabilities.clone(),
			missing_policies: self.missing.clone(),
		}
	}
}
