// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy rows, authorization requests and identifier helpers.
//!
//! Subjects, domains, objects and actions are opaque strings. The helpers in
//! this module produce the canonical forms used throughout Loom:
//!
//! - users: `tenant:<domain>:user:<id>`
//! - roles: `role:<slug>`
//! - domains: `global` or a lowercase tenant uuid
//! - objects: `<module>.<resource>`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved cross-tenant domain.
pub const GLOBAL_DOMAIN: &str = "global";

/// Matches any value in a subject, domain, object or action position.
pub const WILDCARD: &str = "*";

const TENANT_PREFIX: &str = "tenant";
const USER_PREFIX: &str = "user";
const ROLE_PREFIX: &str = "role:";
const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum PolicyType {
	#[serde(rename = "p")]
	Policy,
	#[serde(rename = "g")]
	Grouping,
	#[serde(rename = "g2")]
	SecondaryGrouping,
}

impl PolicyType {
	pub fn as_str(&self) -> &'static str {
		match self {
			PolicyType::Policy => "p",
			PolicyType::Grouping => "g",
			PolicyType::SecondaryGrouping => "g2",
		}
	}

	/// `g` and `g2` rows express role inheritance.
	pub fn is_grouping(&self) -> bool {
		matches!(self, PolicyType::Grouping | PolicyType::SecondaryGrouping)
	}
}

impl fmt::Display for PolicyType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for PolicyType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"p" => Ok(PolicyType::Policy),
			"g" => Ok(PolicyType::Grouping),
			"g2" => Ok(PolicyType::SecondaryGrouping),
			other => Err(format!("unknown policy type: {other}")),
		}
	}
}

#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Effect {
	#[default]
	Allow,
	Deny,
}

impl Effect {
	pub fn as_str(&self) -> &'static str {
		match self {
			Effect::Allow => "allow",
			Effect::Deny => "deny",
		}
	}
}

impl fmt::Display for Effect {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Effect {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"" | "allow" => Ok(Effect::Allow),
			"deny" => Ok(Effect::Deny),
			other => Err(format!("unknown effect: {other}")),
		}
	}
}

/// A single policy rule.
///
/// For grouping rows (`g`, `g2`) `subject` inherits from `object` within
/// `domain`; `action` is always `*` and `effect` is ignored.
///
/// Rows compare by value. The derived ordering sorts by type, then subject,
/// domain, object, action and effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PolicyRow {
	#[serde(rename = "type")]
	pub ptype: PolicyType,
	pub subject: String,
	pub domain: String,
	pub object: String,
	#[serde(default)]
	pub action: String,
	#[serde(default)]
	pub effect: Effect,
}

impl PolicyRow {
	pub fn policy(
		subject: impl Into<String>,
		domain: impl Into<String>,
		object: impl Into<String>,
		action: impl Into<String>,
		effect: Effect,
	) -> Self {
		Self {
			ptype: PolicyType::Policy,
			subject: subject.into(),
			domain: domain.into(),
			object: object.into(),
			action: action.into(),
			effect,
		}
		.normalized()
	}

	/// `subject` inherits from `role` within `domain`.
	pub fn grouping(
		subject: impl Into<String>,
		role: impl Into<String>,
		domain: impl Into<String>,
	) -> Self {
		Self {
			ptype: PolicyType::Grouping,
			subject: subject.into(),
			domain: domain.into(),
			object: role.into(),
			action: WILDCARD.to_string(),
			effect: Effect::Allow,
		}
		.normalized()
	}

	/// Trim every field, lowercase the action and fill grouping defaults.
	pub fn normalized(mut self) -> Self {
		self.subject = self.subject.trim().to_string();
		self.domain = self.domain.trim().to_string();
		self.object = self.object.trim().to_string();
		self.action = normalize_action(&self.action);
		if self.ptype.is_grouping() {
			self.action = WILDCARD.to_string();
			self.effect = Effect::Allow;
			if self.domain.is_empty() {
				self.domain = WILDCARD.to_string();
			}
		}
		self
	}

	/// Structural checks applied before a row is written.
	pub fn validate(&self) -> Result<(), String> {
		if self.subject.trim().is_empty() {
			return Err("subject is required".to_string());
		}
		if self.domain.trim().is_empty() {
			return Err("domain is required".to_string());
		}
		if self.object.trim().is_empty() {
			return Err(if self.ptype.is_grouping() {
				"role is required".to_string()
			} else {
				"object is required".to_string()
			});
		}
		if self.action.trim().is_empty() {
			return Err("action is required".to_string());
		}
		Ok(())
	}

	/// Human-readable row descriptor used in decision traces.
	pub fn descriptor(&self) -> String {
		if self.ptype.is_grouping() {
			format!(
				"{}, {}, {}, {}",
				self.ptype, self.subject, self.object, self.domain
			)
		} else {
			format!(
				"{}, {}, {}, {}, {}, {}",
				self.ptype, self.subject, self.domain, self.object, self.action, self.effect
			)
		}
	}
}

impl fmt::Display for PolicyRow {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.descriptor())
	}
}

/// Parameters of a single authorization question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AuthorizationRequest {
	pub subject: String,
	pub domain: String,
	pub object: String,
	pub action: String,
	#[serde(default)]
	pub attributes: BTreeMap<String, String>,
}

impl AuthorizationRequest {
	pub fn new(
		subject: impl Into<String>,
		domain: impl Into<String>,
		object: impl Into<String>,
		action: impl Into<String>,
	) -> Self {
		Self {
			subject: subject.into(),
			domain: domain.into(),
			object: object.into(),
			action: action.into(),
			attributes: BTreeMap::new(),
		}
	}

	pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self
			.attributes
			.extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
		self
	}

	pub fn with_attribute(self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.with_attributes([(key.into(), value.into())])
	}

	pub(crate) fn normalized(&self) -> Self {
		Self {
			subject: self.subject.trim().to_string(),
			domain: self.domain.trim().to_string(),
			object: self.object.trim().to_string(),
			action: self.action.trim().to_lowercase(),
			attributes: self.attributes.clone(),
		}
	}
}

/// `tenant:<domain>:user:<uuid>`; a missing or nil user id becomes `anonymous`.
pub fn subject_for_user(tenant_id: Option<Uuid>, user_id: Option<Uuid>) -> String {
	let user = match user_id {
		Some(id) if !id.is_nil() => id.to_string(),
		_ => ANONYMOUS.to_string(),
	};
	subject_for_user_id(tenant_id, &user)
}

/// Like [`subject_for_user`] with a free-form user identifier.
pub fn subject_for_user_id(tenant_id: Option<Uuid>, user_id: &str) -> String {
	let user = match user_id.trim() {
		"" => ANONYMOUS,
		trimmed => trimmed,
	};
	format!(
		"{TENANT_PREFIX}:{}:{USER_PREFIX}:{user}",
		domain_from_tenant(tenant_id)
	)
}

pub fn subject_for_role(slug: &str) -> String {
	let slug = slug.trim();
	if slug.is_empty() {
		return format!("{ROLE_PREFIX}unnamed");
	}
	if slug.starts_with(ROLE_PREFIX) {
		return slug.to_string();
	}
	format!("{ROLE_PREFIX}{}", slug.to_lowercase())
}

pub fn domain_from_tenant(tenant_id: Option<Uuid>) -> String {
	match tenant_id {
		Some(id) if !id.is_nil() => id.hyphenated().to_string().to_lowercase(),
		_ => GLOBAL_DOMAIN.to_string(),
	}
}

pub fn object_name(module: &str, resource: &str) -> String {
	let module = match module.trim().to_lowercase() {
		m if m.is_empty() => GLOBAL_DOMAIN.to_string(),
		m => m,
	};
	let resource = match resource.trim().to_lowercase() {
		r if r.is_empty() => "resource".to_string(),
		r => r,
	};
	format!("{module}.{resource}")
}

/// Trim and lowercase; an empty action becomes the wildcard.
pub fn normalize_action(action: &str) -> String {
	let action = action.trim().to_lowercase();
	if action.is_empty() {
		WILDCARD.to_string()
	} else {
		action
	}
}

/// `<object>.<action>`, the key under which view state records a capability.
pub fn capability_key(object: &str, action: &str) -> String {
	format!("{}.{}", object.trim().to_lowercase(), normalize_action(action))
}
