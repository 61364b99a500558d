// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_authz_core::PolicyRow;
use loom_common_eventbus::{Event, EventBus};
use loom_server_db::{PolicyChangeRequest, PolicyDraftStatus};
use serde::Serialize;

pub type PolicyEventBus = EventBus<PolicyEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyEventKind {
	DraftCreated,
	DraftStatusChanged,
	PolicyApplied,
}

/// Payload of a committed policy change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyApplied {
	pub base_revision: String,
	pub revision: String,
	pub added: Vec<PolicyRow>,
	pub removed: Vec<PolicyRow>,
	pub actor: String,
}

#[derive(Debug, Clone)]
pub enum PolicyEvent {
	DraftCreated {
		draft: PolicyChangeRequest,
	},
	DraftStatusChanged {
		previous_status: PolicyDraftStatus,
		draft: PolicyChangeRequest,
	},
	PolicyApplied(PolicyApplied),
}

impl Event for PolicyEvent {
	type Kind = PolicyEventKind;

	fn kind(&self) -> PolicyEventKind {
		match self {
			PolicyEvent::DraftCreated { .. } => PolicyEventKind::DraftCreated,
			PolicyEvent::DraftStatusChanged { .. } => PolicyEventKind::DraftStatusChanged,
			PolicyEvent::PolicyApplied(_) => PolicyEventKind::PolicyApplied,
		}
	}
}
