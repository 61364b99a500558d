// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Per-endpoint token bucket rate limiting.
//!
//! Buckets hold `per_minute` tokens and refill continuously. The limiter is
//! per process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const APPLY_ENDPOINT: &str = "core.api.authz.apply";
pub const DEBUG_ENDPOINT: &str = "core.api.authz.debug";

#[derive(Debug, Clone)]
pub struct RateLimiter {
	buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
	refill_rate: f64, // tokens per second
	max_tokens: u32,
}

#[derive(Debug, Clone)]
struct TokenBucket {
	tokens: f64,
	last_refill: Instant,
}

impl RateLimiter {
	pub fn per_minute(limit: u32) -> Self {
		let limit = limit.max(1);
		Self::with_rate(f64::from(limit) / 60.0, limit)
	}

	pub fn with_rate(refill_rate: f64, max_tokens: u32) -> Self {
		Self {
			buckets: Arc::new(Mutex::new(HashMap::new())),
			refill_rate,
			max_tokens,
		}
	}

	/// Take a token for `key`, or report how long until one is available.
	pub async fn check(&self, key: &str) -> Result<(), Duration> {
		let mut buckets = self.buckets.lock().await;

		let now = Instant::now();
		let bucket = buckets.entry(key.to_string()).or_insert_with(|| TokenBucket {
			tokens: f64::from(self.max_tokens),
			last_refill: now,
		});

		let elapsed = now.duration_since(bucket.last_refill);
		bucket.tokens =
			(bucket.tokens + elapsed.as_secs_f64() * self.refill_rate).min(f64::from(self.max_tokens));
		bucket.last_refill = now;

		if bucket.tokens >= 1.0 {
			bucket.tokens -= 1.0;
			debug!(endpoint = key, remaining = bucket.tokens, "rate limit check passed");
			return Ok(());
		}

		let wait = (1.0 - bucket.tokens) / self.refill_rate;
		warn!(endpoint = key, "rate limit exceeded");
		Err(Duration::from_secs_f64(wait))
	}

	pub async fn remaining(&self, key: &str) -> u32 {
		let buckets = self.buckets.lock().await;
		buckets
			.get(key)
			.map(|b| b.tokens.floor() as u32)
			.unwrap_or(self.max_tokens)
	}
}

impl Default for RateLimiter {
	fn default() -> Self {
		Self::per_minute(20)
	}
}
