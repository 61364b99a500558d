// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Routes that exist only to exercise server failure paths.
//!
//! The allowlist hides these outside development environments.

/// GET /__test__/panic - Panics inside a handler.
pub async fn panic_route() -> &'static str {
	panic!("test panic route invoked")
}
