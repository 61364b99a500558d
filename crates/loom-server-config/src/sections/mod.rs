// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for loom-server.

pub mod authz;
pub mod database;
pub mod environment;
pub mod http;
pub mod logging;
pub mod ops_guard;
pub mod routing;
pub mod webhook_replay;

pub use authz::{AuthzConfig, AuthzConfigLayer, PolicyBackend};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use environment::{EnvironmentConfig, EnvironmentConfigLayer};
pub use http::{HttpConfig, HttpConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use ops_guard::{OpsGuardConfig, OpsGuardConfigLayer};
pub use routing::{RoutingConfig, RoutingConfigLayer};
pub use webhook_replay::{WebhookReplayConfig, WebhookReplayConfigLayer};
