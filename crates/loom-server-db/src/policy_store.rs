// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy rows and revision stored in SQLite.

use async_trait::async_trait;
use loom_authz_core::{
	apply_changes, PolicyChange, PolicyRevision, PolicyRow, PolicyStore, RevisionProvider,
	StoreError,
};
use sqlx::{sqlite::SqlitePool, Row, Sqlite, Transaction};

use crate::error::{DbError, Result};
use crate::{format_ts, parse_ts};

pub(crate) const SCHEMA: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS authz_policy_rows (
		ptype TEXT NOT NULL,
		subject TEXT NOT NULL,
		domain TEXT NOT NULL,
		object TEXT NOT NULL,
		action TEXT NOT NULL,
		effect TEXT NOT NULL,
		UNIQUE (ptype, subject, domain, object, action, effect)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS authz_policy_revision (
		id INTEGER PRIMARY KEY CHECK (id = 1),
		revision TEXT NOT NULL,
		applied_at TEXT NOT NULL
	)
	"#,
];

/// [`PolicyStore`] over a SQLite pool.
///
/// The revision lives in a single-row table; every apply replaces the row set
/// and the revision inside one transaction.
#[derive(Clone)]
pub struct SqlitePolicyStore {
	pool: SqlitePool,
}

impl SqlitePolicyStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Write an initial revision if none exists and return the current one.
	#[tracing::instrument(skip(self))]
	pub async fn ensure_revision(&self) -> Result<PolicyRevision> {
		let initial = PolicyRevision::fresh();
		sqlx::query(
			"INSERT INTO authz_policy_revision (id, revision, applied_at) VALUES (1, ?, ?) \
			 ON CONFLICT(id) DO NOTHING",
		)
		.bind(&initial.revision)
		.bind(format_ts(&initial.applied_at))
		.execute(&self.pool)
		.await?;

		self.load_revision().await
	}

	/// Insert `rows` only when the table is empty. Returns whether it seeded.
	#[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
	pub async fn seed_if_empty(&self, rows: &[PolicyRow]) -> Result<bool> {
		let mut tx = self.pool.begin().await?;
		let count: i64 = sqlx::query("SELECT COUNT(*) as cnt FROM authz_policy_rows")
			.fetch_one(&mut *tx)
			.await?
			.get("cnt");
		if count > 0 {
			tx.rollback().await?;
			return Ok(false);
		}

		for row in rows {
			insert_row(&mut tx, &row.clone().normalized()).await?;
		}
		write_revision(&mut tx, &PolicyRevision::fresh()).await?;
		tx.commit().await?;

		tracing::info!(rows = rows.len(), "seeded policy table");
		Ok(true)
	}

	async fn load_revision(&self) -> Result<PolicyRevision> {
		let row = sqlx::query("SELECT revision, applied_at FROM authz_policy_revision WHERE id = 1")
			.fetch_optional(&self.pool)
			.await?
			.ok_or_else(|| DbError::NotFound("policy revision".to_string()))?;
		row_to_revision(&row)
	}
}

async fn fetch_revision(tx: &mut Transaction<'_, Sqlite>) -> std::result::Result<PolicyRevision, StoreError> {
	sqlx::query("SELECT revision, applied_at FROM authz_policy_revision WHERE id = 1")
		.fetch_optional(&mut **tx)
		.await
		.map_err(DbError::from)?
		.map(|row| row_to_revision(&row))
		.transpose()?
		.ok_or_else(|| StoreError::RevisionUnavailable("no policy revision recorded".to_string()))
}

async fn fetch_rows(tx: &mut Transaction<'_, Sqlite>) -> Result<Vec<PolicyRow>> {
	sqlx::query(
		"SELECT ptype, subject, domain, object, action, effect FROM authz_policy_rows ORDER BY rowid",
	)
	.fetch_all(&mut **tx)
	.await?
	.iter()
	.map(row_to_policy)
	.collect()
}

async fn insert_row(tx: &mut Transaction<'_, Sqlite>, row: &PolicyRow) -> Result<()> {
	sqlx::query(
		"INSERT INTO authz_policy_rows (ptype, subject, domain, object, action, effect) \
		 VALUES (?, ?, ?, ?, ?, ?)",
	)
	.bind(row.ptype.as_str())
	.bind(&row.subject)
	.bind(&row.domain)
	.bind(&row.object)
	.bind(&row.action)
	.bind(row.effect.as_str())
	.execute(&mut **tx)
	.await?;
	Ok(())
}

async fn write_revision(tx: &mut Transaction<'_, Sqlite>, revision: &PolicyRevision) -> Result<()> {
	sqlx::query(
		"INSERT INTO authz_policy_revision (id, revision, applied_at) VALUES (1, ?, ?) \
		 ON CONFLICT(id) DO UPDATE SET revision = excluded.revision, applied_at = excluded.applied_at",
	)
	.bind(&revision.revision)
	.bind(format_ts(&revision.applied_at))
	.execute(&mut **tx)
	.await?;
	Ok(())
}

fn row_to_revision(row: &sqlx::sqlite::SqliteRow) -> Result<PolicyRevision> {
	let applied_at: String = row.get("applied_at");
	Ok(PolicyRevision {
		revision: row.get("revision"),
		applied_at: parse_ts(&applied_at)?,
	})
}

fn row_to_policy(row: &sqlx::sqlite::SqliteRow) -> Result<PolicyRow> {
	let ptype: String = row.get("ptype");
	let effect: String = row.get("effect");
	Ok(PolicyRow {
		ptype: ptype.parse().map_err(DbError::Internal)?,
		subject: row.get("subject"),
		domain: row.get("domain"),
		object: row.get("object"),
		action: row.get("action"),
		effect: effect.parse().map_err(DbError::Internal)?,
	})
}

#[async_trait]
impl RevisionProvider for SqlitePolicyStore {
	async fn current(&self) -> std::result::Result<PolicyRevision, StoreError> {
		self.load_revision().await.map_err(|e| match e {
			DbError::NotFound(_) => StoreError::RevisionUnavailable("no policy revision recorded".to_string()),
			other => other.into(),
		})
	}
}

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
	async fn snapshot(&self) -> std::result::Result<(Vec<PolicyRow>, PolicyRevision), StoreError> {
		// Both reads share one transaction so rows and revision always match.
		let mut tx = self.pool.begin().await.map_err(DbError::from)?;
		let revision = fetch_revision(&mut tx).await?;
		let rows = fetch_rows(&mut tx).await?;
		tx.commit().await.map_err(DbError::from)?;
		Ok((rows, revision))
	}

	#[tracing::instrument(skip(self, changes), fields(base_revision = %base_revision, changes = changes.len()))]
	async fn apply_atomic(
		&self,
		base_revision: &str,
		changes: &[PolicyChange],
	) -> std::result::Result<PolicyRevision, StoreError> {
		let mut tx = self.pool.begin().await.map_err(DbError::from)?;

		let current = fetch_revision(&mut tx).await?;
		if current.revision != base_revision {
			return Err(StoreError::RevisionMismatch {
				expected: base_revision.to_string(),
				current: current.revision,
			});
		}

		let existing = fetch_rows(&mut tx).await?;

		let next = apply_changes(&existing, changes)?;

		sqlx::query("DELETE FROM authz_policy_rows")
			.execute(&mut *tx)
			.await
			.map_err(DbError::from)?;
		for row in &next {
			insert_row(&mut tx, row).await?;
		}

		let mut revision = PolicyRevision::fresh();
		while revision.revision == current.revision {
			revision = PolicyRevision::fresh();
		}
		write_revision(&mut tx, &revision).await?;
		tx.commit().await.map_err(DbError::from)?;

		tracing::info!(revision = %revision.revision, rows = next.len(), "policy changes applied");
		Ok(revision)
	}
}
