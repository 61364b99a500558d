// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loom authorization core.
//!
//! This crate holds the pieces of the authorization subsystem that do not
//! depend on HTTP or SQL:
//!
//! - [`types`]: policy rows, requests and the identifier helpers
//! - [`policy_file`]: the CSV policy file format
//! - [`engine`]: the immutable [`PolicySnapshot`] and its decision algorithm
//! - [`mode`]: `disabled` / `shadow` / `enforce` and where the mode comes from
//! - [`revision`]: revision tokens and the `.rev` file provider
//! - [`store`]: the [`PolicyStore`] trait with in-memory and file backends
//! - [`service`]: the [`AuthzService`] facade with hot-swappable snapshots
//! - [`view_state`]: per-request capability records
//! - [`stage`]: per-user staging of proposed policy changes
//!
//! Every decision is a pure function of a snapshot and a request. The only
//! mutable state is the snapshot pointer inside [`AuthzService`] and the
//! entries of the [`StageStore`].

pub mod engine;
pub mod error;
pub mod mode;
pub mod policy_file;
pub mod revision;
pub mod service;
pub mod stage;
pub mod store;
pub mod types;
pub mod view_state;

pub use engine::{Decision, PolicySnapshot, SubjectSet};
pub use error::{AuthzError, Result, StageError, StoreError};
pub use mode::{FileModeProvider, Mode, ModeProvider, StaticModeProvider, AUTHZ_MODE_ENV};
pub use policy_file::{parse_policy_csv, write_policy_csv, PolicyParseError};
pub use revision::{new_revision_token, FileRevisionProvider, PolicyRevision, RevisionProvider};
pub use service::{AuthzOutcome, AuthzService, DecisionObserver, InspectionResult};
pub use stage::{StageKey, StageKind, StagePayload, StageStore, StagedEntry, DEFAULT_STAGE_LIMIT};
pub use store::{
	apply_changes, ChangeOp, FilePolicyStore, MemoryPolicyStore, PolicyChange, PolicyStore,
};
pub use types::{
	capability_key, domain_from_tenant, normalize_action, object_name, subject_for_role,
	subject_for_user, subject_for_user_id, AuthorizationRequest, Effect, PolicyRow, PolicyType,
	GLOBAL_DOMAIN, WILDCARD,
};
pub use view_state::{MissingPolicy, PolicySuggestion, ViewState, ViewStateSnapshot};
