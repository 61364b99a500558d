// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Review workflow for policy change requests.
//!
//! Every operation is tenant-scoped. A draft owned by another tenant yields
//! [`DraftError::TenantMismatch`]; callers surface it exactly like
//! [`DraftError::NotFound`].

use std::sync::Arc;

use chrono::{Duration, Utc};
use loom_authz_core::{
	domain_from_tenant, normalize_action, subject_for_user, PolicyChange, RevisionProvider,
};
use loom_server_db::{
	BotLockParams, FindParams, PolicyChangeRequest, PolicyChangeRequestStore, PolicyDraftStatus,
	UpdateBotMetadataParams, UpdateStatusParams,
};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{DraftError, DraftResult};
use crate::events::{PolicyEvent, PolicyEventBus};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 500;

#[derive(Debug, Clone, Default)]
pub struct CreateDraftParams {
	pub tenant_id: Uuid,
	pub requester_id: Uuid,
	/// Defaults to the requester's subject.
	pub subject: String,
	/// Defaults to the tenant's domain.
	pub domain: String,
	pub object: String,
	pub action: String,
	pub reason: String,
	/// Either a JSON array of `{op, row}` or a string holding one.
	pub diff: Value,
	pub base_revision: Option<String>,
	pub as_draft: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListDraftsParams {
	pub statuses: Vec<PolicyDraftStatus>,
	pub requester_id: Option<Uuid>,
	pub approver_id: Option<Uuid>,
	pub subject: Option<String>,
	pub domain: Option<String>,
	pub limit: i64,
	pub offset: i64,
	pub sort_asc: bool,
}

/// Parse a diff into change operations. Rows are normalized and validated.
pub fn parse_diff(diff: &Value) -> DraftResult<Vec<PolicyChange>> {
	let parsed;
	let value = match diff {
		Value::String(text) => {
			parsed = serde_json::from_str::<Value>(text)
				.map_err(|e| DraftError::InvalidDiff(e.to_string()))?;
			&parsed
		}
		other => other,
	};
	if !value.is_array() {
		return Err(DraftError::InvalidDiff("diff must be a JSON array".to_string()));
	}

	let changes: Vec<PolicyChange> = serde_json::from_value(value.clone())
		.map_err(|e| DraftError::InvalidDiff(e.to_string()))?;
	if changes.is_empty() {
		return Err(DraftError::InvalidDiff("diff is empty".to_string()));
	}

	changes
		.into_iter()
		.map(|change| {
			let row = change.row.normalized();
			row.validate().map_err(DraftError::InvalidDiff)?;
			Ok(PolicyChange { op: change.op, row })
		})
		.collect()
}

/// Changes that undo `changes` when applied after them.
pub fn reverse_changes(changes: &[PolicyChange]) -> Vec<PolicyChange> {
	changes.iter().rev().map(PolicyChange::inverse).collect()
}

fn changes_to_value(changes: &[PolicyChange]) -> DraftResult<Value> {
	serde_json::to_value(changes).map_err(|e| DraftError::InvalidDiff(e.to_string()))
}

pub struct PolicyDraftService {
	repo: Arc<dyn PolicyChangeRequestStore>,
	revisions: Arc<dyn RevisionProvider>,
	events: Arc<PolicyEventBus>,
}

impl PolicyDraftService {
	pub fn new(
		repo: Arc<dyn PolicyChangeRequestStore>,
		revisions: Arc<dyn RevisionProvider>,
		events: Arc<PolicyEventBus>,
	) -> Self {
		Self {
			repo,
			revisions,
			events,
		}
	}

	#[instrument(skip(self, params), fields(tenant_id = %params.tenant_id, requester_id = %params.requester_id))]
	pub async fn create(&self, params: CreateDraftParams) -> DraftResult<PolicyChangeRequest> {
		if params.requester_id.is_nil() {
			return Err(DraftError::InvalidParams("requester is required".to_string()));
		}
		let object = params.object.trim().to_string();
		if object.is_empty() {
			return Err(DraftError::InvalidParams("object is required".to_string()));
		}
		if params.action.trim().is_empty() {
			return Err(DraftError::InvalidParams("action is required".to_string()));
		}
		let changes = parse_diff(&params.diff)?;

		let current = self.revisions.current().await?;
		if let Some(base) = params.base_revision.as_deref().map(str::trim) {
			if !base.is_empty() && base != current.revision {
				return Err(DraftError::RevisionMismatch {
					current: current.revision,
				});
			}
		}

		let subject = match params.subject.trim() {
			"" => subject_for_user(Some(params.tenant_id), Some(params.requester_id)),
			s => s.to_string(),
		};
		let domain = match params.domain.trim() {
			"" => domain_from_tenant(Some(params.tenant_id)),
			d => d.to_string(),
		};
		let status = if params.as_draft {
			PolicyDraftStatus::Draft
		} else {
			PolicyDraftStatus::PendingReview
		};

		let now = Utc::now();
		let draft = PolicyChangeRequest {
			id: Uuid::new_v4(),
			tenant_id: params.tenant_id,
			requester_id: params.requester_id,
			approver_id: None,
			status,
			subject,
			domain,
			object,
			action: normalize_action(&params.action),
			reason: params.reason.trim().to_string(),
			diff: changes_to_value(&changes)?,
			base_policy_revision: current.revision,
			applied_policy_revision: None,
			applied_policy_snapshot: None,
			pr_link: None,
			bot_job_id: None,
			bot_lock: None,
			bot_locked_at: None,
			bot_attempts: 0,
			error_log: None,
			created_at: now,
			updated_at: now,
			reviewed_at: None,
		};
		self.repo.create(&draft).await?;

		info!(draft_id = %draft.id, status = %draft.status, changes = changes.len(), "policy draft created");
		self.events.publish(&PolicyEvent::DraftCreated {
			draft: draft.clone(),
		});
		Ok(draft)
	}

	pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> DraftResult<PolicyChangeRequest> {
		let draft = self.repo.get_by_id(id).await?.ok_or(DraftError::NotFound)?;
		if draft.tenant_id != tenant_id {
			return Err(DraftError::TenantMismatch);
		}
		Ok(draft)
	}

	pub async fn list(
		&self,
		tenant_id: Uuid,
		params: ListDraftsParams,
	) -> DraftResult<(Vec<PolicyChangeRequest>, i64)> {
		let limit = match params.limit {
			l if l <= 0 => DEFAULT_LIST_LIMIT,
			l if l > MAX_LIST_LIMIT => MAX_LIST_LIMIT,
			l => l,
		};
		let find = FindParams {
			statuses: params.statuses,
			tenant_id: Some(tenant_id),
			requester_id: params.requester_id,
			approver_id: params.approver_id,
			subject: params.subject,
			domain: params.domain,
			limit,
			offset: params.offset.max(0),
			sort_asc: params.sort_asc,
		};
		Ok(self.repo.list(&find).await?)
	}

	#[instrument(skip(self))]
	pub async fn approve(&self, tenant_id: Uuid, id: Uuid, approver_id: Uuid) -> DraftResult<PolicyChangeRequest> {
		self.review(tenant_id, id, approver_id, PolicyDraftStatus::Approved).await
	}

	#[instrument(skip(self))]
	pub async fn reject(&self, tenant_id: Uuid, id: Uuid, approver_id: Uuid) -> DraftResult<PolicyChangeRequest> {
		self.review(tenant_id, id, approver_id, PolicyDraftStatus::Rejected).await
	}

	#[instrument(skip(self))]
	pub async fn cancel(&self, tenant_id: Uuid, id: Uuid) -> DraftResult<PolicyChangeRequest> {
		let draft = self.get(tenant_id, id).await?;
		if !matches!(
			draft.status,
			PolicyDraftStatus::Draft | PolicyDraftStatus::PendingReview | PolicyDraftStatus::Approved
		) {
			return Err(DraftError::InvalidStatusTransition {
				from: draft.status,
				to: PolicyDraftStatus::Canceled,
			});
		}
		let params = UpdateStatusParams {
			approver_id: Some(None),
			reviewed_at: Some(Some(Utc::now())),
			..UpdateStatusParams::new(PolicyDraftStatus::Canceled)
		};
		self.transition(tenant_id, id, params).await
	}

	#[instrument(skip(self))]
	pub async fn submit(&self, tenant_id: Uuid, id: Uuid) -> DraftResult<PolicyChangeRequest> {
		self.transition(tenant_id, id, UpdateStatusParams::new(PolicyDraftStatus::PendingReview)).await
	}

	/// Send a failed draft back to review.
	#[instrument(skip(self))]
	pub async fn retry(&self, tenant_id: Uuid, id: Uuid) -> DraftResult<PolicyChangeRequest> {
		let draft = self.get(tenant_id, id).await?;
		if draft.status != PolicyDraftStatus::Failed {
			return Err(DraftError::InvalidStatusTransition {
				from: draft.status,
				to: PolicyDraftStatus::PendingReview,
			});
		}
		self.transition(tenant_id, id, UpdateStatusParams::new(PolicyDraftStatus::PendingReview)).await
	}

	#[instrument(skip(self, snapshot))]
	pub async fn mark_merged(
		&self,
		tenant_id: Uuid,
		id: Uuid,
		revision: &str,
		snapshot: &[PolicyChange],
	) -> DraftResult<PolicyChangeRequest> {
		let draft = self.get(tenant_id, id).await?;
		ensure_transition(draft.status, PolicyDraftStatus::Merged)?;
		self.repo
			.update_bot_metadata(
				id,
				&UpdateBotMetadataParams {
					applied_policy_revision: Some(Some(revision.to_string())),
					applied_policy_snapshot: Some(Some(changes_to_value(snapshot)?)),
					error_log: Some(None),
					..Default::default()
				},
			)
			.await?;
		self.transition(tenant_id, id, UpdateStatusParams::new(PolicyDraftStatus::Merged)).await
	}

	#[instrument(skip(self))]
	pub async fn mark_failed(&self, tenant_id: Uuid, id: Uuid, error: &str) -> DraftResult<PolicyChangeRequest> {
		let draft = self.get(tenant_id, id).await?;
		ensure_transition(draft.status, PolicyDraftStatus::Failed)?;
		self.repo
			.update_bot_metadata(
				id,
				&UpdateBotMetadataParams {
					error_log: Some(Some(error.to_string())),
					..Default::default()
				},
			)
			.await?;
		self.transition(tenant_id, id, UpdateStatusParams::new(PolicyDraftStatus::Failed)).await
	}

	/// Record a bot run: bump the attempt counter, remember the job, clear the last error.
	#[instrument(skip(self))]
	pub async fn trigger_bot(&self, tenant_id: Uuid, id: Uuid, locker: &str) -> DraftResult<PolicyChangeRequest> {
		let draft = self.get(tenant_id, id).await?;
		let locker = locker.trim();
		self.repo
			.update_bot_metadata(
				id,
				&UpdateBotMetadataParams {
					bot_attempts: Some(draft.bot_attempts + 1),
					bot_job_id: (!locker.is_empty()).then(|| Some(locker.to_string())),
					error_log: Some(None),
					..Default::default()
				},
			)
			.await?;
		let updated = self.get(tenant_id, id).await?;
		self.events.publish(&PolicyEvent::DraftStatusChanged {
			previous_status: draft.status,
			draft: updated.clone(),
		});
		Ok(updated)
	}

	/// New pending draft whose diff is the source's applied snapshot.
	#[instrument(skip(self))]
	pub async fn revert(&self, tenant_id: Uuid, source_id: Uuid, requester_id: Uuid) -> DraftResult<PolicyChangeRequest> {
		let source = self.get(tenant_id, source_id).await?;
		let snapshot = match &source.applied_policy_snapshot {
			Some(Value::Array(items)) if !items.is_empty() => Value::Array(items.clone()),
			_ => return Err(DraftError::MissingSnapshot),
		};
		self.create(CreateDraftParams {
			tenant_id,
			requester_id,
			subject: source.subject.clone(),
			domain: source.domain.clone(),
			object: source.object.clone(),
			action: source.action.clone(),
			reason: format!("revert {}", source.id),
			diff: snapshot,
			base_revision: None,
			as_draft: false,
		})
		.await
	}

	pub async fn acquire_bot_lock(
		&self,
		tenant_id: Uuid,
		id: Uuid,
		locker: &str,
		stale_after: Duration,
	) -> DraftResult<bool> {
		self.get(tenant_id, id).await?;
		let now = Utc::now();
		Ok(self
			.repo
			.acquire_bot_lock(
				id,
				&BotLockParams {
					locker: locker.to_string(),
					locked_at: now,
					stale_before: now - stale_after,
				},
			)
			.await?)
	}

	pub async fn release_bot_lock(&self, tenant_id: Uuid, id: Uuid, locker: &str) -> DraftResult<()> {
		self.get(tenant_id, id).await?;
		Ok(self.repo.release_bot_lock(id, locker).await?)
	}

	pub async fn force_release_bot_lock(&self, tenant_id: Uuid, id: Uuid) -> DraftResult<()> {
		self.get(tenant_id, id).await?;
		Ok(self.repo.force_release_bot_lock(id).await?)
	}

	async fn review(
		&self,
		tenant_id: Uuid,
		id: Uuid,
		approver_id: Uuid,
		to: PolicyDraftStatus,
	) -> DraftResult<PolicyChangeRequest> {
		if approver_id.is_nil() {
			return Err(DraftError::InvalidParams("approver is required".to_string()));
		}
		let params = UpdateStatusParams {
			approver_id: Some(Some(approver_id)),
			reviewed_at: Some(Some(Utc::now())),
			..UpdateStatusParams::new(to)
		};
		self.transition(tenant_id, id, params).await
	}

	async fn transition(
		&self,
		tenant_id: Uuid,
		id: Uuid,
		mut params: UpdateStatusParams,
	) -> DraftResult<PolicyChangeRequest> {
		let draft = self.get(tenant_id, id).await?;
		let from = draft.status;
		ensure_transition(from, params.status)?;
		params.expected_status = Some(from);

		match self.repo.update_status(id, &params).await {
			Ok(()) => {}
			Err(loom_server_db::DbError::Conflict(_)) => {
				return Err(DraftError::InvalidStatusTransition {
					from,
					to: params.status,
				});
			}
			Err(e) => return Err(e.into()),
		}

		let updated = self.get(tenant_id, id).await?;
		info!(draft_id = %id, from = %from, to = %updated.status, "policy draft status changed");
		self.events.publish(&PolicyEvent::DraftStatusChanged {
			previous_status: from,
			draft: updated.clone(),
		});
		Ok(updated)
	}
}

fn ensure_transition(from: PolicyDraftStatus, to: PolicyDraftStatus) -> DraftResult<()> {
	if from.can_transition_to(to) {
		Ok(())
	} else {
		Err(DraftError::InvalidStatusTransition { from, to })
	}
}
