// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Webhook replay protection limits.

use serde::Deserialize;

const DEFAULT_TTL_SECS: u64 = 600;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReplayConfig {
	pub ttl_secs: u64,
	pub max_body_bytes: usize,
	pub max_entries: usize,
}

impl Default for WebhookReplayConfig {
	fn default() -> Self {
		WebhookReplayConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookReplayConfigLayer {
	#[serde(default)]
	pub ttl_secs: Option<u64>,
	#[serde(default)]
	pub max_body_bytes: Option<usize>,
	#[serde(default)]
	pub max_entries: Option<usize>,
}

impl WebhookReplayConfigLayer {
	pub fn merge(&mut self, other: WebhookReplayConfigLayer) {
		if other.ttl_secs.is_some() {
			self.ttl_secs = other.ttl_secs;
		}
		if other.max_body_bytes.is_some() {
			self.max_body_bytes = other.max_body_bytes;
		}
		if other.max_entries.is_some() {
			self.max_entries = other.max_entries;
		}
	}

	pub fn finalize(self) -> WebhookReplayConfig {
		WebhookReplayConfig {
			ttl_secs: self.ttl_secs.unwrap_or(DEFAULT_TTL_SECS),
			max_body_bytes: self
				.max_body_bytes
				.filter(|n| *n > 0)
				.unwrap_or(DEFAULT_MAX_BODY_BYTES),
			max_entries: self
				.max_entries
				.filter(|n| *n > 0)
				.unwrap_or(DEFAULT_MAX_ENTRIES),
		}
	}
}
