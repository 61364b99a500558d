// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy change workflow for Loom server.
//!
//! [`PolicyDraftService`] owns the review state machine for persisted change
//! requests. [`ApplyController`] commits staged edits or approved drafts to
//! the policy store, reloads the decision engine and announces the change on
//! the [`PolicyEventBus`].

pub mod apply;
pub mod draft;
pub mod error;
pub mod events;

pub use apply::{ApplyContext, ApplyController, ApplyOutcome, ApplyRequest, DEFAULT_BOT_LOCK_STALE_SECS};
pub use draft::{
	parse_diff, reverse_changes, CreateDraftParams, ListDraftsParams, PolicyDraftService,
	DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT,
};
pub use error::{ApplyError, ApplyResult, DraftError, DraftResult};
pub use events::{PolicyApplied, PolicyEvent, PolicyEventBus, PolicyEventKind};
