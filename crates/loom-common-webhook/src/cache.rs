// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{ReplayError, Result};

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
	pub ttl: Duration,
	pub max_body_bytes: usize,
	pub max_entries: usize,
}

impl Default for ReplayConfig {
	fn default() -> Self {
		Self {
			ttl: DEFAULT_TTL,
			max_body_bytes: DEFAULT_MAX_BODY_BYTES,
			max_entries: DEFAULT_MAX_ENTRIES,
		}
	}
}

#[derive(Default)]
struct Entries {
	expires: HashMap<String, Instant>,
	// insertion order; may hold stale keys that were re-marked or swept
	order: VecDeque<(String, Instant)>,
}

impl Entries {
	fn sweep(&mut self, now: Instant) {
		self.expires.retain(|_, expiry| *expiry > now);
		let expires = &self.expires;
		self
			.order
			.retain(|(key, expiry)| expires.get(key).is_some_and(|e| e == expiry));
	}

	fn evict_oldest(&mut self) -> bool {
		while let Some((key, expiry)) = self.order.pop_front() {
			if self.expires.get(&key) == Some(&expiry) {
				self.expires.remove(&key);
				debug!(key = %key, "webhook replay cache evicted oldest entry");
				return true;
			}
		}
		false
	}
}

/// TTL cache of delivery keys, bounded by `max_entries`.
///
/// Expired keys are swept on every lookup. When the cap is reached the oldest
/// insertion is evicted first.
pub struct ReplayCache {
	config: ReplayConfig,
	entries: Mutex<Entries>,
}

impl ReplayCache {
	pub fn new(config: ReplayConfig) -> Result<Self> {
		if config.ttl.is_zero() {
			return Err(ReplayError::InvalidConfig("ttl must be positive".to_string()));
		}
		if config.max_entries == 0 {
			return Err(ReplayError::InvalidConfig(
				"max_entries must be positive".to_string(),
			));
		}
		Ok(Self {
			config,
			entries: Mutex::new(Entries::default()),
		})
	}

	pub fn config(&self) -> &ReplayConfig {
		&self.config
	}

	pub fn is_seen(&self, key: &str) -> bool {
		self.is_seen_at(key, Instant::now())
	}

	pub fn is_seen_at(&self, key: &str, now: Instant) -> bool {
		let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
		entries.sweep(now);
		entries.expires.contains_key(key)
	}

	pub fn mark(&self, key: &str) {
		self.mark_at(key, Instant::now());
	}

	pub fn mark_at(&self, key: &str, now: Instant) {
		let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
		let expiry = now + self.config.ttl;
		if !entries.expires.contains_key(key) {
			while entries.expires.len() >= self.config.max_entries {
				if !entries.evict_oldest() {
					break;
				}
			}
		}
		entries.expires.insert(key.to_string(), expiry);
		entries.order.push_back((key.to_string(), expiry));
	}

	pub fn len(&self) -> usize {
		self
			.entries
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.expires
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cache(ttl_secs: u64, max_entries: usize) -> ReplayCache {
		ReplayCache::new(ReplayConfig {
			ttl: Duration::from_secs(ttl_secs),
			max_body_bytes: DEFAULT_MAX_BODY_BYTES,
			max_entries,
		})
		.unwrap()
	}

	#[test]
	fn test_unseen_key() {
		let c = cache(60, 10);
		assert!(!c.is_seen("a"));
	}

	#[test]
	fn test_marked_key_seen_within_ttl() {
		let c = cache(60, 10);
		let now = Instant::now();
		c.mark_at("a", now);
		assert!(c.is_seen_at("a", now + Duration::from_secs(59)));
	}

	#[test]
	fn test_marked_key_expires_after_ttl() {
		let c = cache(60, 10);
		let now = Instant::now();
		c.mark_at("a", now);
		assert!(!c.is_seen_at("a", now + Duration::from_secs(60)));
		assert!(c.is_empty());
	}

	#[test]
	fn test_cap_evicts_oldest() {
		let c = cache(60, 2);
		let now = Instant::now();
		c.mark_at("a", now);
		c.mark_at("b", now + Duration::from_millis(1));
		c.mark_at("c", now + Duration::from_millis(2));

		assert_eq!(c.len(), 2);
		assert!(!c.is_seen_at("a", now + Duration::from_millis(3)));
		assert!(c.is_seen_at("b", now + Duration::from_millis(3)));
		assert!(c.is_seen_at("c", now + Duration::from_millis(3)));
	}

	#[test]
	fn test_remark_refreshes_without_evicting() {
		let c = cache(60, 2);
		let now = Instant::now();
		c.mark_at("a", now);
		c.mark_at("b", now);
		c.mark_at("a", now + Duration::from_secs(30));

		assert_eq!(c.len(), 2);
		assert!(c.is_seen_at("a", now + Duration::from_secs(80)));
		assert!(!c.is_seen_at("b", now + Duration::from_secs(80)));
	}

	#[test]
	fn test_rejects_zero_ttl_and_cap() {
		assert!(ReplayCache::new(ReplayConfig {
			ttl: Duration::ZERO,
			..ReplayConfig::default()
		})
		.is_err());
		assert!(ReplayCache::new(ReplayConfig {
			max_entries: 0,
			..ReplayConfig::default()
		})
		.is_err());
	}
}
