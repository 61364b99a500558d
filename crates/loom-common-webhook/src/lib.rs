// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Webhook replay protection.
//!
//! A delivery is identified by `sha256(path || "\n" || body)`. The
//! [`ReplayCache`] remembers keys of successfully handled deliveries for a
//! TTL so duplicates can be acknowledged without running the handler again.

pub mod cache;

pub use cache::{ReplayCache, ReplayConfig, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};

use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
	#[error("webhook payload exceeds {limit} bytes")]
	PayloadTooLarge { limit: usize },

	#[error("invalid replay configuration: {0}")]
	InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ReplayError>;

/// Compute the replay key for a delivery.
///
/// Returns the hex-encoded SHA-256 digest.
pub fn replay_key(path: &str, body: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(path.as_bytes());
	hasher.update(b"\n");
	hasher.update(body);
	hex::encode(hasher.finalize())
}

/// Reject bodies larger than `limit`.
pub fn check_body_size(len: usize, limit: usize) -> Result<()> {
	if len > limit {
		return Err(ReplayError::PayloadTooLarge { limit });
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_replay_key_is_sha256_hex() {
		let key = replay_key("/webhooks/github", b"{}");
		assert_eq!(key.len(), 64);
		assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn test_replay_key_known_vector() {
		// sha256("/a\n") computed independently
		let expected = {
			let mut h = Sha256::new();
			h.update(b"/a\n");
			hex::encode(h.finalize())
		};
		assert_eq!(replay_key("/a", b""), expected);
	}

	#[test]
	fn test_replay_key_separates_path_and_body() {
		assert_ne!(replay_key("/a", b"b"), replay_key("/a\nb", b""));
		assert_ne!(replay_key("/a", b"x"), replay_key("/b", b"x"));
	}

	#[test]
	fn test_check_body_size() {
		assert!(check_body_size(10, 10).is_ok());
		assert!(matches!(
			check_body_size(11, 10),
			Err(ReplayError::PayloadTooLarge { limit: 10 })
		));
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn prop_key_is_deterministic(
			path in "/[a-z/]{0,20}",
			body in proptest::collection::vec(proptest::num::u8::ANY, 0..512)
		) {
			prop_assert_eq!(replay_key(&path, &body), replay_key(&path, &body));
		}

		#[test]
		fn prop_key_is_64_hex_chars(
			path in "/[a-z/]{0,20}",
			body in proptest::collection::vec(proptest::num::u8::ANY, 0..512)
		) {
			let key = replay_key(&path, &body);
			prop_assert_eq!(key.len(), 64);
			prop_assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
		}

		#[test]
		fn prop_different_bodies_different_keys(
			body1 in proptest::collection::vec(proptest::num::u8::ANY, 1..256),
			body2 in proptest::collection::vec(proptest::num::u8::ANY, 1..256)
		) {
			if body1 != body2 {
				prop_assert_ne!(replay_key("/webhooks/x", &body1), replay_key("/webhooks/x", &body2));
			}
		}
	}
}
