// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	ops_guard::split_cidrs, AuthzConfigLayer, DatabaseConfigLayer, EnvironmentConfigLayer,
	HttpConfigLayer, LogFormat, LoggingConfigLayer, OpsGuardConfigLayer, PolicyBackend,
	RoutingConfigLayer, WebhookReplayConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/loom/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: LOOM_SERVER_<SECTION>_<FIELD>, plus the unprefixed names the
/// routing, ops guard and webhook layers have always used.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			http: Some(load_http_from_env()?),
			database: Some(load_database_from_env()),
			logging: Some(load_logging_from_env()?),
			environment: Some(load_environment_from_env()),
			authz: Some(load_authz_from_env()?),
			routing: Some(load_routing_from_env()),
			ops_guard: Some(load_ops_guard_from_env()),
			webhook_replay: Some(load_webhook_replay_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: std::str::FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {kind} value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_http_from_env() -> Result<HttpConfigLayer, ConfigError> {
	Ok(HttpConfigLayer {
		host: env_var("LOOM_SERVER_HOST"),
		port: env_parse("LOOM_SERVER_PORT", "u16")?,
		base_url: env_var("LOOM_SERVER_BASE_URL"),
	})
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("LOOM_SERVER_DATABASE_URL"),
	}
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = match env_var("LOOM_SERVER_LOG_FORMAT") {
		Some(v) => Some(v.parse::<LogFormat>().map_err(|message| ConfigError::InvalidValue {
			key: "LOOM_SERVER_LOG_FORMAT".to_string(),
			message,
		})?),
		None => None,
	};
	Ok(LoggingConfigLayer {
		level: env_var("LOOM_SERVER_LOG_LEVEL"),
		format,
	})
}

fn load_environment_from_env() -> EnvironmentConfigLayer {
	EnvironmentConfigLayer {
		name: env_var("GO_APP_ENV").or_else(|| env_var("LOOM_SERVER_ENV")),
		enable_dev_endpoints: env_bool("ENABLE_DEV_ENDPOINTS"),
		enable_graphql_playground: env_bool("ENABLE_GRAPHQL_PLAYGROUND"),
		enable_test_endpoints: env_bool("ENABLE_TEST_ENDPOINTS"),
	}
}

fn load_authz_from_env() -> Result<AuthzConfigLayer, ConfigError> {
	let policy_backend = match env_var("LOOM_SERVER_AUTHZ_POLICY_BACKEND") {
		Some(v) => Some(v.parse::<PolicyBackend>().map_err(|message| {
			ConfigError::InvalidValue {
				key: "LOOM_SERVER_AUTHZ_POLICY_BACKEND".to_string(),
				message,
			}
		})?),
		None => None,
	};
	Ok(AuthzConfigLayer {
		mode: env_var(loom_authz_core::AUTHZ_MODE_ENV),
		mode_file: env_var("LOOM_SERVER_AUTHZ_MODE_FILE").map(PathBuf::from),
		policy_path: env_var("LOOM_SERVER_AUTHZ_POLICY_PATH").map(PathBuf::from),
		policy_backend,
		user_header: env_var("LOOM_SERVER_AUTHZ_USER_HEADER"),
		rate_limit_per_minute: env_parse("LOOM_SERVER_AUTHZ_RATE_LIMIT_PER_MINUTE", "u32")?,
		stage_limit: env_parse("LOOM_SERVER_AUTHZ_STAGE_LIMIT", "usize")?,
	})
}

fn load_routing_from_env() -> RoutingConfigLayer {
	RoutingConfigLayer {
		allowlist_path: env_var(loom_common_routing::ALLOWLIST_PATH_ENV).map(PathBuf::from),
		entrypoint: env_var("LOOM_SERVER_ROUTING_ENTRYPOINT"),
	}
}

fn load_ops_guard_from_env() -> OpsGuardConfigLayer {
	OpsGuardConfigLayer {
		enabled: env_bool("OPS_GUARD_ENABLED"),
		allowed_cidrs: env_var("OPS_GUARD_CIDRS").map(|raw| split_cidrs(&raw)),
		token: env_var("OPS_GUARD_TOKEN"),
		basic_user: env_var("OPS_GUARD_USER"),
		basic_password: env_var("OPS_GUARD_PASSWORD"),
		real_ip_header: env_var("OPS_GUARD_REAL_IP_HEADER"),
	}
}

fn load_webhook_replay_from_env() -> Result<WebhookReplayConfigLayer, ConfigError> {
	Ok(WebhookReplayConfigLayer {
		ttl_secs: env_parse("WEBHOOK_REPLAY_TTL_SECS", "u64")?,
		max_body_bytes: env_parse("WEBHOOK_REPLAY_MAX_BODY_BYTES", "usize")?,
		max_entries: env_parse("WEBHOOK_REPLAY_MAX_ENTRIES", "usize")?,
	})
}
