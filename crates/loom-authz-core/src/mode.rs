// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization mode and its providers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Environment variable that pins the mode regardless of the mode file.
pub const AUTHZ_MODE_ENV: &str = "AUTHZ_MODE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	/// Every request is allowed without consulting the engine.
	Disabled,
	/// The engine is consulted and denials are logged, never enforced.
	#[default]
	Shadow,
	/// Denials are returned to the caller.
	Enforce,
}

impl Mode {
	pub fn as_str(&self) -> &'static str {
		match self {
			Mode::Disabled => "disabled",
			Mode::Shadow => "shadow",
			Mode::Enforce => "enforce",
		}
	}

	/// Parse a mode, mapping anything unrecognised to [`Mode::Shadow`].
	pub fn sanitize(value: &str) -> Mode {
		value.parse().unwrap_or(Mode::Shadow)
	}
}

impl fmt::Display for Mode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Mode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"disabled" => Ok(Mode::Disabled),
			"shadow" => Ok(Mode::Shadow),
			"enforce" => Ok(Mode::Enforce),
			other => Err(format!("unknown authz mode: {other}")),
		}
	}
}

/// Source of the current mode, consulted on every authorization call.
pub trait ModeProvider: Send + Sync {
	fn mode(&self) -> Mode;
}

#[derive(Debug, Clone, Copy)]
pub struct StaticModeProvider(pub Mode);

impl ModeProvider for StaticModeProvider {
	fn mode(&self) -> Mode {
		self.0
	}
}

#[derive(Debug, Deserialize)]
struct ModeDocument {
	#[serde(default)]
	mode: String,
}

/// Reads `mode: <value>` from a YAML file on every call.
///
/// An unreadable file yields the last mode successfully read, or the
/// fallback before the first read. A document that does not parse yields the
/// fallback.
#[derive(Debug)]
pub struct FileModeProvider {
	path: PathBuf,
	fallback: Mode,
	pinned: Option<Mode>,
	last: Mutex<Option<Mode>>,
}

impl FileModeProvider {
	pub fn new(path: impl Into<PathBuf>, fallback: Mode) -> Self {
		Self {
			path: path.into(),
			fallback,
			pinned: None,
			last: Mutex::new(None),
		}
	}

	/// Pin the mode, ignoring the file. Used for `AUTHZ_MODE`.
	pub fn with_override(mut self, mode: Option<Mode>) -> Self {
		self.pinned = mode;
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl ModeProvider for FileModeProvider {
	fn mode(&self) -> Mode {
		if let Some(mode) = self.pinned {
			return mode;
		}

		let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
		let raw = match std::fs::read_to_string(&self.path) {
			Ok(raw) => raw,
			Err(e) => {
				debug!(path = %self.path.display(), error = %e, "authz mode file unreadable");
				return last.unwrap_or(self.fallback);
			}
		};

		match serde_yaml::from_str::<ModeDocument>(&raw) {
			Ok(doc) => {
				let mode = Mode::sanitize(&doc.mode);
				if last.is_some_and(|prev| prev != mode) {
					warn!(path = %self.path.display(), mode = %mode, "authz mode changed");
				}
				*last = Some(mode);
				mode
			}
			Err(e) => {
				warn!(path = %self.path.display(), error = %e, "authz mode file invalid, using fallback");
				self.fallback
			}
		}
	}
}
