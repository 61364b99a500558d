// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Versioned YAML allowlist of route prefixes.
//!
//! ```yaml
//! version: 1
//! entrypoints:
//!   server:
//!     - { prefix: "/api/v1", class: public_api }
//!     - { prefix: "/health", class: ops }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::class::RouteClass;
use crate::error::{Result, RoutingError};

/// Environment variable overriding the allowlist location.
pub const ALLOWLIST_PATH_ENV: &str = "ROUTING_ALLOWLIST_PATH";

/// Allowlist location relative to the workspace root.
pub const DEFAULT_ALLOWLIST_RELATIVE: &str = "config/routing/allowlist.yaml";

/// Entrypoint used when the caller passes an empty name.
pub const DEFAULT_ENTRYPOINT: &str = "server";

const SUPPORTED_VERSION: u32 = 1;

/// A single prefix → class mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistRule {
	pub prefix: String,
	pub class: RouteClass,
}

impl AllowlistRule {
	pub fn new(prefix: impl Into<String>, class: RouteClass) -> Self {
		Self {
			prefix: prefix.into(),
			class,
		}
	}
}

#[derive(Debug, Deserialize)]
struct AllowlistFile {
	#[serde(default)]
	version: u32,
	#[serde(default)]
	entrypoints: HashMap<String, Vec<RawRule>>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
	#[serde(default)]
	prefix: String,
	#[serde(default)]
	class: String,
}

/// Resolve the allowlist path.
///
/// `ROUTING_ALLOWLIST_PATH` wins when set. Otherwise the nearest ancestor of
/// the working directory that holds both a `Cargo.toml` and the allowlist is
/// used, falling back to the bare relative path.
pub fn default_allowlist_path() -> PathBuf {
	if let Ok(path) = std::env::var(ALLOWLIST_PATH_ENV) {
		let trimmed = path.trim();
		if !trimmed.is_empty() {
			return PathBuf::from(trimmed);
		}
	}

	if let Ok(cwd) = std::env::current_dir() {
		if let Some(root) = find_workspace_root(&cwd) {
			return root.join(DEFAULT_ALLOWLIST_RELATIVE);
		}
	}

	PathBuf::from(DEFAULT_ALLOWLIST_RELATIVE)
}

fn find_workspace_root(start: &Path) -> Option<PathBuf> {
	start
		.ancestors()
		.find(|dir| dir.join("Cargo.toml").is_file() && dir.join(DEFAULT_ALLOWLIST_RELATIVE).is_file())
		.map(Path::to_path_buf)
}

/// Load and validate the rules for `entrypoint` from the allowlist at `path`.
///
/// An empty `path` resolves through [`default_allowlist_path`]; an empty
/// `entrypoint` selects `server`.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display(), entrypoint = %entrypoint))]
pub fn load_allowlist(path: impl AsRef<Path>, entrypoint: &str) -> Result<Vec<AllowlistRule>> {
	let path = path.as_ref();
	let path = if path.as_os_str().is_empty() {
		default_allowlist_path()
	} else {
		path.to_path_buf()
	};

	let raw = match std::fs::read_to_string(&path) {
		Ok(raw) => raw,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
			return Err(RoutingError::AllowlistNotFound(path));
		}
		Err(source) => return Err(RoutingError::Read { path, source }),
	};

	let rules = parse_allowlist(&raw, entrypoint)?;
	debug!(rules = rules.len(), path = %path.display(), "routing allowlist loaded");
	Ok(rules)
}

/// Parse allowlist YAML already held in memory.
pub fn parse_allowlist(raw: &str, entrypoint: &str) -> Result<Vec<AllowlistRule>> {
	let file: AllowlistFile = serde_yaml::from_str(raw)?;

	if file.version != SUPPORTED_VERSION {
		return Err(RoutingError::UnsupportedVersion(file.version));
	}

	let entrypoint = match entrypoint.trim() {
		"" => DEFAULT_ENTRYPOINT,
		name => name,
	};

	let mut entrypoints = file.entrypoints;
	let raw_rules = entrypoints
		.remove(entrypoint)
		.ok_or_else(|| RoutingError::EntrypointNotFound(entrypoint.to_string()))?;

	raw_rules
		.into_iter()
		.enumerate()
		.map(|(index, rule)| {
			let prefix = rule.prefix.trim().to_string();
			if prefix.is_empty() {
				return Err(RoutingError::EmptyPrefix { index });
			}
			if !prefix.starts_with('/') {
				return Err(RoutingError::InvalidPrefix { index, prefix });
			}
			let class = rule
				.class
				.trim()
				.parse::<RouteClass>()
				.map_err(|_| RoutingError::UnknownClass {
					index,
					class: rule.class.clone(),
				})?;
			Ok(AllowlistRule { prefix, class })
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	const SAMPLE: &str = r#"
version: 1
entrypoints:
  server:
    - { prefix: "/api/v1",  class: public_api }
    - { prefix: " /health ", class: ops }
    - { prefix: "/__test__", class: test }
  superadmin:
    - { prefix: "/", class: ui }
"#;

	#[test]
	fn test_parse_selects_entrypoint_and_trims_prefixes() {
		let rules = parse_allowlist(SAMPLE, "server").unwrap();
		assert_eq!(rules.len(), 3);
		assert_eq!(rules[1], AllowlistRule::new("/health", RouteClass::Ops));
	}

	#[test]
	fn test_empty_entrypoint_defaults_to_server() {
		let rules = parse_allowlist(SAMPLE, "  ").unwrap();
		assert_eq!(rules[0].class, RouteClass::PublicApi);
	}

	#[test]
	fn test_missing_entrypoint() {
		let err = parse_allowlist(SAMPLE, "worker").unwrap_err();
		assert!(matches!(err, RoutingError::EntrypointNotFound(name) if name == "worker"));
	}

	#[test]
	fn test_wrong_version_rejected() {
		let raw = "version: 2\nentrypoints:\n  server: []\n";
		assert!(matches!(
			parse_allowlist(raw, "server"),
			Err(RoutingError::UnsupportedVersion(2))
		));
	}

	#[test]
	fn test_missing_version_rejected() {
		let raw = "entrypoints:\n  server: []\n";
		assert!(matches!(
			parse_allowlist(raw, "server"),
			Err(RoutingError::UnsupportedVersion(0))
		));
	}

	#[test]
	fn test_empty_prefix_rejected() {
		let raw = "version: 1\nentrypoints:\n  server:\n    - { prefix: \"  \", class: ui }\n";
		assert!(matches!(
			parse_allowlist(raw, "server"),
			Err(RoutingError::EmptyPrefix { index: 0 })
		));
	}

	#[test]
	fn test_relative_prefix_rejected() {
		let raw = "version: 1\nentrypoints:\n  server:\n    - { prefix: \"/ok\", class: ui }\n    - { prefix: \"api\", class: ui }\n";
		match parse_allowlist(raw, "server") {
			Err(RoutingError::InvalidPrefix { index, prefix }) => {
				assert_eq!(index, 1);
				assert_eq!(prefix, "api");
			}
			other => panic!("unexpected result: {other:?}"),
		}
	}

	#[test]
	fn test_unknown_class_rejected() {
		let raw = "version: 1\nentrypoints:\n  server:\n    - { prefix: \"/x\", class: graphql }\n";
		match parse_allowlist(raw, "server") {
			Err(RoutingError::UnknownClass { index, class }) => {
				assert_eq!(index, 0);
				assert_eq!(class, "graphql");
			}
			other => panic!("unexpected result: {other:?}"),
		}
	}

	#[test]
	fn test_load_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nope.yaml");
		assert!(matches!(
			load_allowlist(&path, "server"),
			Err(RoutingError::AllowlistNotFound(p)) if p == path
		));
	}

	#[test]
	fn test_load_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(SAMPLE.as_bytes()).unwrap();
		let rules = load_allowlist(file.path(), "superadmin").unwrap();
		assert_eq!(rules, vec![AllowlistRule::new("/", RouteClass::Ui)]);
	}

	#[test]
	fn test_workspace_allowlist_has_critical_rules() {
		let Some(root) = find_workspace_root(Path::new(env!("CARGO_MANIFEST_DIR"))) else {
			panic!("workspace allowlist not found");
		};
		let path = root.join(DEFAULT_ALLOWLIST_RELATIVE);
		let rules = load_allowlist(&path, "server").unwrap();
		for (prefix, class) in [
			("/api/v1", RouteClass::PublicApi),
			("/health", RouteClass::Ops),
			("/debug/prometheus", RouteClass::Ops),
			("/_dev", RouteClass::DevOnly),
			("/playground", RouteClass::DevOnly),
			("/__test__", RouteClass::Test),
		] {
			assert!(
				rules.contains(&AllowlistRule::new(prefix, class)),
				"allowlist missing rule: {prefix} -> {class}"
			);
		}
		assert!(!load_allowlist(&path, "superadmin").unwrap().is_empty());
	}
}
