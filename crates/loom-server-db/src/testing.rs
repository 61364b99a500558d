// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::{policy_change_request, policy_store, tenant};

/// In-memory pool. A single connection keeps every query on the same database.
pub async fn create_test_pool() -> SqlitePool {
	SqlitePoolOptions::new()
		.max_connections(1)
		.connect(":memory:")
		.await
		.unwrap()
}

async fn execute_all(pool: &SqlitePool, statements: &[&str]) {
	for statement in statements {
		sqlx::query(statement).execute(pool).await.unwrap();
	}
}

pub async fn create_policy_tables(pool: &SqlitePool) {
	execute_all(pool, policy_store::SCHEMA).await;
}

pub async fn create_policy_change_requests_table(pool: &SqlitePool) {
	execute_all(pool, policy_change_request::SCHEMA).await;
}

pub async fn create_tenants_table(pool: &SqlitePool) {
	execute_all(pool, tenant::SCHEMA).await;
}

/// Pool with every table created.
pub async fn create_migrated_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	crate::pool::run_migrations(&pool).await.unwrap();
	pool
}
