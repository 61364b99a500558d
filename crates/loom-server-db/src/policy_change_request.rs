// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted policy change requests (drafts).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::{format_ts, parse_ts, parse_uuid};

pub(crate) const SCHEMA: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS policy_change_requests (
		id TEXT PRIMARY KEY,
		tenant_id TEXT NOT NULL,
		requester_id TEXT NOT NULL,
		approver_id TEXT,
		status TEXT NOT NULL,
		subject TEXT NOT NULL,
		domain TEXT NOT NULL,
		object TEXT NOT NULL,
		action TEXT NOT NULL,
		reason TEXT NOT NULL DEFAULT '',
		diff TEXT NOT NULL,
		base_policy_revision TEXT NOT NULL,
		applied_policy_revision TEXT,
		applied_policy_snapshot TEXT,
		pr_link TEXT,
		bot_job_id TEXT,
		bot_lock TEXT,
		bot_locked_at TEXT,
		bot_attempts INTEGER NOT NULL DEFAULT 0,
		error_log TEXT,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL,
		reviewed_at TEXT
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_policy_change_requests_tenant ON policy_change_requests (tenant_id, updated_at)",
	"CREATE INDEX IF NOT EXISTS idx_policy_change_requests_status ON policy_change_requests (status)",
];

const COLUMNS: &str = "id, tenant_id, requester_id, approver_id, status, subject, domain, object, action, \
	reason, diff, base_policy_revision, applied_policy_revision, applied_policy_snapshot, pr_link, \
	bot_job_id, bot_lock, bot_locked_at, bot_attempts, error_log, created_at, updated_at, reviewed_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDraftStatus {
	Draft,
	PendingReview,
	Approved,
	Rejected,
	Merged,
	Canceled,
	Failed,
}

impl PolicyDraftStatus {
	pub const ALL: [PolicyDraftStatus; 7] = [
		PolicyDraftStatus::Draft,
		PolicyDraftStatus::PendingReview,
		PolicyDraftStatus::Approved,
		PolicyDraftStatus::Rejected,
		PolicyDraftStatus::Merged,
		PolicyDraftStatus::Canceled,
		PolicyDraftStatus::Failed,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			PolicyDraftStatus::Draft => "draft",
			PolicyDraftStatus::PendingReview => "pending_review",
			PolicyDraftStatus::Approved => "approved",
			PolicyDraftStatus::Rejected => "rejected",
			PolicyDraftStatus::Merged => "merged",
			PolicyDraftStatus::Canceled => "canceled",
			PolicyDraftStatus::Failed => "failed",
		}
	}

	/// Statuses reachable from `self` in one step.
	pub fn allowed_transitions(&self) -> &'static [PolicyDraftStatus] {
		use PolicyDraftStatus::*;
		match self {
			Draft => &[PendingReview, Canceled],
			PendingReview => &[Approved, Rejected, Canceled],
			Approved => &[Merged, Canceled, Failed],
			Failed => &[PendingReview, Canceled],
			Rejected | Merged | Canceled => &[],
		}
	}

	pub fn can_transition_to(&self, next: PolicyDraftStatus) -> bool {
		self.allowed_transitions().contains(&next)
	}

	pub fn is_terminal(&self) -> bool {
		self.allowed_transitions().is_empty()
	}
}

impl std::fmt::Display for PolicyDraftStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for PolicyDraftStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"draft" => Ok(PolicyDraftStatus::Draft),
			"pending_review" => Ok(PolicyDraftStatus::PendingReview),
			"approved" => Ok(PolicyDraftStatus::Approved),
			"rejected" => Ok(PolicyDraftStatus::Rejected),
			"merged" => Ok(PolicyDraftStatus::Merged),
			"canceled" => Ok(PolicyDraftStatus::Canceled),
			"failed" => Ok(PolicyDraftStatus::Failed),
			_ => Err(format!("unknown policy draft status: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PolicyChangeRequest {
	pub id: Uuid,
	pub tenant_id: Uuid,
	pub requester_id: Uuid,
	pub approver_id: Option<Uuid>,
	pub status: PolicyDraftStatus,
	pub subject: String,
	pub domain: String,
	pub object: String,
	pub action: String,
	pub reason: String,
	/// JSON array of `{op, row}` changes.
	#[schema(value_type = Object)]
	pub diff: serde_json::Value,
	pub base_policy_revision: String,
	pub applied_policy_revision: Option<String>,
	#[schema(value_type = Option<Object>)]
	pub applied_policy_snapshot: Option<serde_json::Value>,
	pub pr_link: Option<String>,
	pub bot_job_id: Option<String>,
	pub bot_lock: Option<String>,
	pub bot_locked_at: Option<DateTime<Utc>>,
	pub bot_attempts: i64,
	pub error_log: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct FindParams {
	pub statuses: Vec<PolicyDraftStatus>,
	pub tenant_id: Option<Uuid>,
	pub requester_id: Option<Uuid>,
	pub approver_id: Option<Uuid>,
	/// Case-insensitive substring match.
	pub subject: Option<String>,
	pub domain: Option<String>,
	pub limit: i64,
	pub offset: i64,
	pub sort_asc: bool,
}

/// Status update. For the `Option<Option<_>>` fields, `None` leaves the
/// column untouched and `Some(None)` clears it.
#[derive(Debug, Clone)]
pub struct UpdateStatusParams {
	pub status: PolicyDraftStatus,
	/// When set, the update only applies if the stored status still matches.
	pub expected_status: Option<PolicyDraftStatus>,
	pub approver_id: Option<Option<Uuid>>,
	pub reviewed_at: Option<Option<DateTime<Utc>>>,
}

impl UpdateStatusParams {
	pub fn new(status: PolicyDraftStatus) -> Self {
		Self {
			status,
			expected_status: None,
			approver_id: None,
			reviewed_at: None,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct UpdateBotMetadataParams {
	pub bot_job_id: Option<Option<String>>,
	pub bot_attempts: Option<i64>,
	pub error_log: Option<Option<String>>,
	pub pr_link: Option<Option<String>>,
	pub applied_policy_revision: Option<Option<String>>,
	pub applied_policy_snapshot: Option<Option<serde_json::Value>>,
}

impl UpdateBotMetadataParams {
	fn is_empty(&self) -> bool {
		self.bot_job_id.is_none()
			&& self.bot_attempts.is_none()
			&& self.error_log.is_none()
			&& self.pr_link.is_none()
			&& self.applied_policy_revision.is_none()
			&& self.applied_policy_snapshot.is_none()
	}
}

#[derive(Debug, Clone)]
pub struct BotLockParams {
	pub locker: String,
	pub locked_at: DateTime<Utc>,
	/// Locks taken before this instant are considered stale.
	pub stale_before: DateTime<Utc>,
}

#[async_trait]
pub trait PolicyChangeRequestStore: Send + Sync {
	async fn create(&self, request: &PolicyChangeRequest) -> Result<()>;
	async fn get_by_id(&self, id: Uuid) -> Result<Option<PolicyChangeRequest>>;
	async fn list(&self, params: &FindParams) -> Result<(Vec<PolicyChangeRequest>, i64)>;
	async fn update_status(&self, id: Uuid, params: &UpdateStatusParams) -> Result<()>;
	async fn update_bot_metadata(&self, id: Uuid, params: &UpdateBotMetadataParams) -> Result<()>;
	async fn acquire_bot_lock(&self, id: Uuid, params: &BotLockParams) -> Result<bool>;
	async fn release_bot_lock(&self, id: Uuid, locker: &str) -> Result<()>;
	async fn force_release_bot_lock(&self, id: Uuid) -> Result<()>;
}

#[derive(Clone)]
pub struct PolicyChangeRequestRepository {
	pool: SqlitePool,
}

impl PolicyChangeRequestRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, request), fields(request_id = %request.id, tenant_id = %request.tenant_id))]
	pub async fn create(&self, request: &PolicyChangeRequest) -> Result<()> {
		let snapshot = request
			.applied_policy_snapshot
			.as_ref()
			.map(serde_json::to_string)
			.transpose()?;

		sqlx::query(&format!(
			"INSERT INTO policy_change_requests ({COLUMNS}) \
			 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(request.id.to_string())
		.bind(request.tenant_id.to_string())
		.bind(request.requester_id.to_string())
		.bind(request.approver_id.map(|id| id.to_string()))
		.bind(request.status.as_str())
		.bind(&request.subject)
		.bind(&request.domain)
		.bind(&request.object)
		.bind(&request.action)
		.bind(&request.reason)
		.bind(serde_json::to_string(&request.diff)?)
		.bind(&request.base_policy_revision)
		.bind(&request.applied_policy_revision)
		.bind(snapshot)
		.bind(&request.pr_link)
		.bind(&request.bot_job_id)
		.bind(&request.bot_lock)
		.bind(request.bot_locked_at.as_ref().map(format_ts))
		.bind(request.bot_attempts)
		.bind(&request.error_log)
		.bind(format_ts(&request.created_at))
		.bind(format_ts(&request.updated_at))
		.bind(request.reviewed_at.as_ref().map(format_ts))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_by_id(&self, id: Uuid) -> Result<Option<PolicyChangeRequest>> {
		let row = sqlx::query(&format!(
			"SELECT {COLUMNS} FROM policy_change_requests WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(row_to_request).transpose()
	}

	#[tracing::instrument(skip(self, params), fields(limit = params.limit, offset = params.offset))]
	pub async fn list(&self, params: &FindParams) -> Result<(Vec<PolicyChangeRequest>, i64)> {
		let mut conditions = vec!["1=1".to_string()];
		let mut args: Vec<String> = Vec::new();

		if !params.statuses.is_empty() {
			let placeholders = vec!["?"; params.statuses.len()].join(", ");
			conditions.push(format!("status IN ({placeholders})"));
			args.extend(params.statuses.iter().map(|s| s.as_str().to_string()));
		}
		if let Some(tenant_id) = params.tenant_id {
			conditions.push("tenant_id = ?".to_string());
			args.push(tenant_id.to_string());
		}
		if let Some(requester_id) = params.requester_id {
			conditions.push("requester_id = ?".to_string());
			args.push(requester_id.to_string());
		}
		if let Some(approver_id) = params.approver_id {
			conditions.push("approver_id = ?".to_string());
			args.push(approver_id.to_string());
		}
		if let Some(subject) = params.subject.as_deref().filter(|s| !s.trim().is_empty()) {
			conditions.push("LOWER(subject) LIKE ?".to_string());
			args.push(format!("%{}%", subject.trim().to_lowercase()));
		}
		if let Some(domain) = params.domain.as_deref().filter(|d| !d.trim().is_empty()) {
			conditions.push("domain = ?".to_string());
			args.push(domain.trim().to_string());
		}

		let where_clause = conditions.join(" AND ");
		let order = if params.sort_asc { "ASC" } else { "DESC" };

		let count_sql = format!("SELECT COUNT(*) as cnt FROM policy_change_requests WHERE {where_clause}");
		let mut count_query = sqlx::query(&count_sql);
		for arg in &args {
			count_query = count_query.bind(arg);
		}
		let total: i64 = count_query.fetch_one(&self.pool).await?.get("cnt");

		let data_sql = format!(
			"SELECT {COLUMNS} FROM policy_change_requests WHERE {where_clause} \
			 ORDER BY updated_at {order}, id {order} LIMIT ? OFFSET ?"
		);
		let mut data_query = sqlx::query(&data_sql);
		for arg in &args {
			data_query = data_query.bind(arg);
		}
		let rows = data_query
			.bind(params.limit)
			.bind(params.offset.max(0))
			.fetch_all(&self.pool)
			.await?;

		let requests = rows.iter().map(row_to_request).collect::<Result<Vec<_>>>()?;
		Ok((requests, total))
	}

	#[tracing::instrument(skip(self, params), fields(status = %params.status))]
	pub async fn update_status(&self, id: Uuid, params: &UpdateStatusParams) -> Result<()> {
		let now = format_ts(&Utc::now());
		let mut sets = vec!["status = ?".to_string(), "updated_at = ?".to_string()];
		let mut args: Vec<Option<String>> = vec![Some(params.status.as_str().to_string()), Some(now)];

		if let Some(reviewed_at) = &params.reviewed_at {
			sets.push("reviewed_at = ?".to_string());
			args.push(reviewed_at.as_ref().map(format_ts));
		}
		if let Some(approver_id) = &params.approver_id {
			sets.push("approver_id = ?".to_string());
			args.push(approver_id.map(|id| id.to_string()));
		}

		let mut sql = format!(
			"UPDATE policy_change_requests SET {} WHERE id = ?",
			sets.join(", ")
		);
		args.push(Some(id.to_string()));
		if let Some(expected) = params.expected_status {
			sql.push_str(" AND status = ?");
			args.push(Some(expected.as_str().to_string()));
		}

		let mut query = sqlx::query(&sql);
		for arg in &args {
			query = query.bind(arg);
		}
		let result = query.execute(&self.pool).await?;

		if result.rows_affected() == 0 {
			if params.expected_status.is_some() && self.get_by_id(id).await?.is_some() {
				return Err(DbError::Conflict(format!(
					"policy change request {id} changed status concurrently"
				)));
			}
			return Err(DbError::NotFound(id.to_string()));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self, params))]
	pub async fn update_bot_metadata(&self, id: Uuid, params: &UpdateBotMetadataParams) -> Result<()> {
		if params.is_empty() {
			return Ok(());
		}

		let mut sets: Vec<String> = Vec::new();
		let mut args: Vec<Option<String>> = Vec::new();

		if let Some(attempts) = params.bot_attempts {
			sets.push(format!("bot_attempts = {attempts}"));
		}

		if let Some(value) = &params.bot_job_id {
			sets.push("bot_job_id = ?".to_string());
			args.push(value.clone());
		}
		if let Some(value) = &params.error_log {
			sets.push("error_log = ?".to_string());
			args.push(value.clone());
		}
		if let Some(value) = &params.pr_link {
			sets.push("pr_link = ?".to_string());
			args.push(value.clone());
		}
		if let Some(value) = &params.applied_policy_revision {
			sets.push("applied_policy_revision = ?".to_string());
			args.push(value.clone());
		}
		if let Some(value) = &params.applied_policy_snapshot {
			sets.push("applied_policy_snapshot = ?".to_string());
			args.push(value.as_ref().map(serde_json::to_string).transpose()?);
		}
		sets.push("updated_at = ?".to_string());
		args.push(Some(format_ts(&Utc::now())));

		let sql = format!(
			"UPDATE policy_change_requests SET {} WHERE id = ?",
			sets.join(", ")
		);
		let mut query = sqlx::query(&sql);
		for arg in &args {
			query = query.bind(arg);
		}
		let result = query.bind(id.to_string()).execute(&self.pool).await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(id.to_string()));
		}
		Ok(())
	}

	/// Take the bot lock when it is free, stale, or already held by `locker`.
	#[tracing::instrument(skip(self, params), fields(locker = %params.locker))]
	pub async fn acquire_bot_lock(&self, id: Uuid, params: &BotLockParams) -> Result<bool> {
		let locked_at = format_ts(&params.locked_at);
		let result = sqlx::query(
			r#"
			UPDATE policy_change_requests
			SET bot_lock = ?, bot_locked_at = ?, updated_at = ?
			WHERE id = ?
			  AND (
				bot_lock IS NULL
				OR bot_lock = ''
				OR bot_locked_at IS NULL
				OR bot_locked_at < ?
				OR bot_lock = ?
			  )
			"#,
		)
		.bind(&params.locker)
		.bind(&locked_at)
		.bind(&locked_at)
		.bind(id.to_string())
		.bind(format_ts(&params.stale_before))
		.bind(&params.locker)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn release_bot_lock(&self, id: Uuid, locker: &str) -> Result<()> {
		let result = sqlx::query(
			"UPDATE policy_change_requests SET bot_lock = NULL, bot_locked_at = NULL, updated_at = ? \
			 WHERE id = ? AND bot_lock = ?",
		)
		.bind(format_ts(&Utc::now()))
		.bind(id.to_string())
		.bind(locker)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(id.to_string()));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn force_release_bot_lock(&self, id: Uuid) -> Result<()> {
		let result = sqlx::query(
			"UPDATE policy_change_requests SET bot_lock = NULL, bot_locked_at = NULL, updated_at = ? WHERE id = ?",
		)
		.bind(format_ts(&Utc::now()))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(id.to_string()));
		}
		Ok(())
	}
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<PolicyChangeRequest> {
	let id: String = row.get("id");
	let tenant_id: String = row.get("tenant_id");
	let requester_id: String = row.get("requester_id");
	let approver_id: Option<String> = row.get("approver_id");
	let status: String = row.get("status");
	let diff: String = row.get("diff");
	let snapshot: Option<String> = row.get("applied_policy_snapshot");
	let bot_locked_at: Option<String> = row.get("bot_locked_at");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");
	let reviewed_at: Option<String> = row.get("reviewed_at");

	Ok(PolicyChangeRequest {
		id: parse_uuid(&id)?,
		tenant_id: parse_uuid(&tenant_id)?,
		requester_id: parse_uuid(&requester_id)?,
		approver_id: approver_id.as_deref().map(parse_uuid).transpose()?,
		status: status.parse().map_err(DbError::Internal)?,
		subject: row.get("subject"),
		domain: row.get("domain"),
		object: row.get("object"),
		action: row.get("action"),
		reason: row.get("reason"),
		diff: serde_json::from_str(&diff)?,
		base_policy_revision: row.get("base_policy_revision"),
		applied_policy_revision: row.get("applied_policy_revision"),
		applied_policy_snapshot: snapshot.as_deref().map(serde_json::from_str).transpose()?,
		pr_link: row.get("pr_link"),
		bot_job_id: row.get("bot_job_id"),
		bot_lock: row.get("bot_lock"),
		bot_locked_at: bot_locked_at.as_deref().map(parse_ts).transpose()?,
		bot_attempts: row.get("bot_attempts"),
		error_log: row.get("error_log"),
		created_at: parse_ts(&created_at)?,
		updated_at: parse_ts(&updated_at)?,
		reviewed_at: reviewed_at.as_deref().map(parse_ts).transpose()?,
	})
}

#[async_trait]
impl PolicyChangeRequestStore for PolicyChangeRequestRepository {
	async fn create(&self, request: &PolicyChangeRequest) -> Result<()> {
		PolicyChangeRequestRepository::create(self, request).await
	}

	async fn get_by_id(&self, id: Uuid) -> Result<Option<PolicyChangeRequest>> {
		PolicyChangeRequestRepository::get_by_id(self, id).await
	}

	async fn list(&self, params: &FindParams) -> Result<(Vec<PolicyChangeRequest>, i64)> {
		PolicyChangeRequestRepository::list(self, params).await
	}

	async fn update_status(&self, id: Uuid, params: &UpdateStatusParams) -> Result<()> {
		PolicyChangeRequestRepository::update_status(self, id, params).await
	}

	async fn update_bot_metadata(&self, id: Uuid, params: &UpdateBotMetadataParams) -> Result<()> {
		PolicyChangeRequestRepository::update_bot_metadata(self, id, params).await
	}

	async fn acquire_bot_lock(&self, id: Uuid, params: &BotLockParams) -> Result<bool> {
		PolicyChangeRequestRepository::acquire_bot_lock(self, id, params).await
	}

	async fn release_bot_lock(&self, id: Uuid, locker: &str) -> Result<()> {
		PolicyChangeRequestRepository::release_bot_lock(self, id, locker).await
	}

	async fn force_release_bot_lock(&self, id: Uuid) -> Result<()> {
		PolicyChangeRequestRepository::force_release_bot_lock(self, id).await
	}
}
