// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # loom-server-db
//!
//! SQLite persistence for the Loom authorization subsystem, via sqlx.
//!
//! ## Repository Pattern
//!
//! Each domain has two components:
//! - **`*Store` trait**: the interface (e.g. `PolicyChangeRequestStore`)
//! - **`*Repository` struct**: the implementation holding a `SqlitePool`
//!
//! The trait impl delegates to inherent methods on the repository.
//!
//! ## Error Handling
//!
//! | Variant | When to use |
//! |---------|-------------|
//! | `NotFound` | An id the caller provided does not exist |
//! | `Conflict` | Unique violation or a concurrent modification |
//! | `Sqlx` | Unexpected database errors, propagated with `?` |
//! | `Internal` | Stored data that cannot be decoded |
//!
//! Lookups where absence is normal return `Result<Option<T>>`.
//!
//! ## Timestamps
//!
//! Stored as RFC 3339 strings with nanosecond precision and a `Z` suffix,
//! so lexical comparison in SQL matches chronological order.

pub mod error;
pub mod policy_change_request;
pub mod policy_store;
pub mod pool;
pub mod tenant;

#[doc(hidden)]
pub mod testing;

pub use error::{DbError, Result};
pub use policy_change_request::{
	BotLockParams, FindParams, PolicyChangeRequest, PolicyChangeRequestRepository,
	PolicyChangeRequestStore, PolicyDraftStatus, UpdateBotMetadataParams, UpdateStatusParams,
};
pub use policy_store::SqlitePolicyStore;
pub use pool::{create_pool, run_migrations};
pub use sqlx::SqlitePool;
pub use tenant::{Tenant, TenantRepository, TenantStore};

use chrono::{DateTime, SecondsFormat, Utc};

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(value)
		.map(|d| d.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp {value}: {e}")))
}

pub(crate) fn parse_uuid(value: &str) -> Result<uuid::Uuid> {
	uuid::Uuid::parse_str(value).map_err(|e| DbError::Internal(format!("invalid uuid {value}: {e}")))
}
