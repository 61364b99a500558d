// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use loom_authz_core::{
	AuthzService, ChangeOp, PolicyChange, PolicyRow, PolicyStore, StageKey, StageStore,
};
use loom_server_db::{PolicyChangeRequest, PolicyDraftStatus};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::draft::{parse_diff, reverse_changes, PolicyDraftService};
use crate::error::{ApplyError, ApplyResult, DraftError};
use crate::events::{PolicyApplied, PolicyEvent, PolicyEventBus};

/// Bot locks older than this many seconds may be taken over.
pub const DEFAULT_BOT_LOCK_STALE_SECS: i64 = 15 * 60;

/// Who is applying, and whose stage to read.
#[derive(Debug, Clone)]
pub struct ApplyContext {
	pub stage_key: StageKey,
	pub actor: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApplyRequest {
	#[serde(default)]
	pub base_revision: String,
	#[serde(default)]
	pub subject: String,
	#[serde(default)]
	pub domain: String,
	#[serde(default)]
	pub reason: String,
	/// When absent the caller's staged entries are applied.
	#[serde(default)]
	pub changes: Option<Vec<PolicyChange>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApplyOutcome {
	pub base_revision: String,
	pub revision: String,
	pub added: Vec<PolicyRow>,
	pub removed: Vec<PolicyRow>,
}

pub struct ApplyController {
	store: Arc<dyn PolicyStore>,
	authz: Arc<AuthzService>,
	stage: Arc<StageStore>,
	drafts: Arc<PolicyDraftService>,
	events: Arc<PolicyEventBus>,
}

impl ApplyController {
	pub fn new(
		store: Arc<dyn PolicyStore>,
		authz: Arc<AuthzService>,
		stage: Arc<StageStore>,
		drafts: Arc<PolicyDraftService>,
		events: Arc<PolicyEventBus>,
	) -> Self {
		Self {
			store,
			authz,
			stage,
			drafts,
			events,
		}
	}

	/// Apply explicit changes, or the caller's stage, against `base_revision`.
	///
	/// Staged entries are selected by domain; an entry with an empty subject
	/// takes the request subject, others must match it when one is given.
	/// Adds of rows that already exist are dropped. Applied stage entries are
	/// removed from the stage on success.
	#[instrument(skip(self, cancel, ctx, request), fields(actor = %ctx.actor, base_revision = %request.base_revision))]
	pub async fn apply_stage(
		&self,
		cancel: &CancellationToken,
		ctx: &ApplyContext,
		request: ApplyRequest,
	) -> ApplyResult<ApplyOutcome> {
		let base_revision = request.base_revision.trim().to_string();
		if base_revision.is_empty() {
			return Err(ApplyError::MissingBaseRevision);
		}
		let subject = request.subject.trim();
		let domain = request.domain.trim();

		let (changes, staged_ids) = match request.changes {
			Some(changes) => (normalize_changes(changes)?, Vec::new()),
			None => {
				let staged: Vec<_> = self
					.stage
					.list(ctx.stage_key, "", domain)
					.into_iter()
					.filter(|e| subject.is_empty() || e.row.subject.is_empty() || e.row.subject == subject)
					.collect();
				let ids = staged.iter().map(|e| e.id).collect::<Vec<Uuid>>();
				let changes = staged
					.into_iter()
					.map(|mut entry| {
						if entry.row.subject.is_empty() {
							entry.row.subject = subject.to_string();
						}
						entry.to_change()
					})
					.collect::<Vec<_>>();
				(normalize_changes(changes)?, ids)
			}
		};
		if changes.is_empty() {
			return Err(ApplyError::StageEmpty);
		}

		let (rows, current) = self.store.snapshot().await?;
		if current.revision != base_revision {
			return Err(ApplyError::RevisionMismatch {
				current: current.revision,
			});
		}
		let present: HashSet<&PolicyRow> = rows.iter().collect();
		let changes: Vec<PolicyChange> = changes
			.into_iter()
			.filter(|c| !(c.op == ChangeOp::Add && present.contains(&c.row)))
			.collect();

		if changes.is_empty() {
			self.stage.discard(ctx.stage_key, &staged_ids);
			info!("every staged add already present, nothing to apply");
			return Ok(ApplyOutcome {
				revision: base_revision.clone(),
				base_revision,
				added: Vec::new(),
				removed: Vec::new(),
			});
		}

		if cancel.is_cancelled() {
			return Err(ApplyError::Cancelled);
		}
		let revision = self.store.apply_atomic(&base_revision, &changes).await?;
		self.stage.discard(ctx.stage_key, &staged_ids);

		let (added, removed) = split_changes(&changes);
		self.after_commit(&base_revision, &revision.revision, &added, &removed, &ctx.actor)
			.await;
		if !request.reason.trim().is_empty() {
			info!(reason = %request.reason.trim(), "policy apply reason");
		}

		Ok(ApplyOutcome {
			base_revision,
			revision: revision.revision,
			added,
			removed,
		})
	}

	/// Apply an approved draft under its bot lock.
	///
	/// Success marks the draft merged with the reverse change set as its
	/// snapshot; failure marks it failed with the error. The lock is always
	/// released.
	#[instrument(skip(self, cancel))]
	pub async fn apply_draft(
		&self,
		cancel: &CancellationToken,
		tenant_id: Uuid,
		id: Uuid,
		locker: &str,
	) -> ApplyResult<PolicyChangeRequest> {
		let draft = self.drafts.get(tenant_id, id).await?;
		if draft.status != PolicyDraftStatus::Approved {
			return Err(DraftError::InvalidStatusTransition {
				from: draft.status,
				to: PolicyDraftStatus::Merged,
			}
			.into());
		}
		let changes = parse_diff(&draft.diff)?;

		if !self
			.drafts
			.acquire_bot_lock(tenant_id, id, locker, Duration::seconds(DEFAULT_BOT_LOCK_STALE_SECS))
			.await?
		{
			return Err(ApplyError::Locked);
		}

		let result = self.apply_draft_locked(cancel, &draft, &changes, locker).await;

		if let Err(e) = self.drafts.release_bot_lock(tenant_id, id, locker).await {
			warn!(draft_id = %id, error = %e, "failed to release bot lock");
		}

		match result {
			Ok(merged) => Ok(merged),
			Err(e) => {
				if !matches!(e, ApplyError::Cancelled) {
					if let Err(mark) = self.drafts.mark_failed(tenant_id, id, &e.to_string()).await {
						error!(draft_id = %id, error = %mark, "failed to mark draft failed");
					}
				}
				Err(e)
			}
		}
	}

	async fn apply_draft_locked(
		&self,
		cancel: &CancellationToken,
		draft: &PolicyChangeRequest,
		changes: &[PolicyChange],
		locker: &str,
	) -> ApplyResult<PolicyChangeRequest> {
		if cancel.is_cancelled() {
			return Err(ApplyError::Cancelled);
		}
		let revision = self
			.store
			.apply_atomic(&draft.base_policy_revision, changes)
			.await?;

		let (added, removed) = split_changes(changes);
		self.after_commit(&draft.base_policy_revision, &revision.revision, &added, &removed, locker)
			.await;

		Ok(self
			.drafts
			.mark_merged(draft.tenant_id, draft.id, &revision.revision, &reverse_changes(changes))
			.await?)
	}

	async fn after_commit(
		&self,
		base_revision: &str,
		revision: &str,
		added: &[PolicyRow],
		removed: &[PolicyRow],
		actor: &str,
	) {
		if let Err(e) = self.authz.reload(self.store.as_ref()).await {
			error!(revision = %revision, error = %e, "policy reload after apply failed");
		}
		info!(
			base_revision = %base_revision,
			revision = %revision,
			added = added.len(),
			removed = removed.len(),
			actor = %actor,
			"policy applied"
		);
		self.events.publish(&PolicyEvent::PolicyApplied(PolicyApplied {
			base_revision: base_revision.to_string(),
			revision: revision.to_string(),
			added: added.to_vec(),
			removed: removed.to_vec(),
			actor: actor.to_string(),
		}));
	}
}

fn normalize_changes(changes: Vec<PolicyChange>) -> ApplyResult<Vec<PolicyChange>> {
	changes
		.into_iter()
		.map(|change| {
			let row = change.row.normalized();
			row.validate().map_err(ApplyError::InvalidChange)?;
			Ok(PolicyChange { op: change.op, row })
		})
		.collect()
}

fn split_changes(changes: &[PolicyChange]) -> (Vec<PolicyRow>, Vec<PolicyRow>) {
	let mut added = Vec::new();
	let mut removed = Vec::new();
	for change in changes {
		match change.op {
			ChangeOp::Add => added.push(change.row.clone()),
			ChangeOp::Remove => removed.push(change.row.clone()),
		}
	}
	(added, removed)
}
