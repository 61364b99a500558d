// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Route classification for Loom HTTP entrypoints.
//!
//! Every request path maps to exactly one [`RouteClass`]. Cross-cutting
//! middleware (error envelopes, the ops guard, webhook replay protection)
//! keys off this single classification instead of matching prefixes itself.
//!
//! ```ignore
//! use loom_common_routing::{load_allowlist, Classifier, RouteClass};
//!
//! let rules = load_allowlist("config/routing/allowlist.yaml", "server")?;
//! let classifier = Classifier::new(rules);
//! assert_eq!(classifier.classify_path("/api/v1/users"), RouteClass::PublicApi);
//! ```

pub mod allowlist;
pub mod class;
pub mod classifier;
pub mod error;

pub use allowlist::{
	default_allowlist_path, load_allowlist, parse_allowlist, AllowlistRule, ALLOWLIST_PATH_ENV,
	DEFAULT_ENTRYPOINT,
};
pub use class::RouteClass;
pub use classifier::{has_path_prefix_on_boundary, Classifier};
pub use error::{Result, RoutingError};
