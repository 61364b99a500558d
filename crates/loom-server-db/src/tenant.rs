// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::{format_ts, parse_ts, parse_uuid};

pub(crate) const SCHEMA: &[&str] = &[r#"
	CREATE TABLE IF NOT EXISTS tenants (
		id TEXT PRIMARY KEY,
		name TEXT NOT NULL,
		domain TEXT NOT NULL UNIQUE,
		created_at TEXT NOT NULL
	)
	"#];

/// A tenant, resolved from the request host name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Tenant {
	pub id: Uuid,
	pub name: String,
	pub domain: String,
	pub created_at: DateTime<Utc>,
}

impl Tenant {
	pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
		Self {
			id: Uuid::new_v4(),
			name: name.into(),
			domain: domain.into().trim().to_ascii_lowercase(),
			created_at: Utc::now(),
		}
	}
}

#[async_trait]
pub trait TenantStore: Send + Sync {
	async fn get_tenant_by_domain(&self, domain: &str) -> Result<Option<Tenant>>;
	async fn get_tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>>;
	async fn create_tenant(&self, tenant: &Tenant) -> Result<()>;
}

#[derive(Clone)]
pub struct TenantRepository {
	pool: SqlitePool,
}

impl TenantRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Domains compare case-insensitively.
	#[tracing::instrument(skip(self))]
	pub async fn get_tenant_by_domain(&self, domain: &str) -> Result<Option<Tenant>> {
		let row = sqlx::query("SELECT id, name, domain, created_at FROM tenants WHERE domain = ?")
			.bind(domain.trim().to_ascii_lowercase())
			.fetch_optional(&self.pool)
			.await?;
		row.as_ref().map(row_to_tenant).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
		let row = sqlx::query("SELECT id, name, domain, created_at FROM tenants WHERE id = ?")
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;
		row.as_ref().map(row_to_tenant).transpose()
	}

	#[tracing::instrument(skip(self, tenant), fields(tenant_id = %tenant.id, domain = %tenant.domain))]
	pub async fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
		sqlx::query("INSERT INTO tenants (id, name, domain, created_at) VALUES (?, ?, ?, ?)")
			.bind(tenant.id.to_string())
			.bind(&tenant.name)
			.bind(&tenant.domain)
			.bind(format_ts(&tenant.created_at))
			.execute(&self.pool)
			.await
			.map_err(|e| match e {
				sqlx::Error::Database(ref db) if db.is_unique_violation() => {
					DbError::Conflict(format!("tenant domain already exists: {}", tenant.domain))
				}
				other => DbError::Sqlx(other),
			})?;
		Ok(())
	}
}

fn row_to_tenant(row: &sqlx::sqlite::SqliteRow) -> Result<Tenant> {
	let id: String = row.get("id");
	let created_at: String = row.get("created_at");
	Ok(Tenant {
		id: parse_uuid(&id)?,
		name: row.get("name"),
		domain: row.get("domain"),
		created_at: parse_ts(&created_at)?,
	})
}

#[async_trait]
impl TenantStore for TenantRepository {
	async fn get_tenant_by_domain(&self, domain: &str) -> Result<Option<Tenant>> {
		TenantRepository::get_tenant_by_domain(self, domain).await
	}

	async fn get_tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
		TenantRepository::get_tenant_by_id(self, id).await
	}

	async fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
		TenantRepository::create_tenant(self, tenant).await
	}
}
