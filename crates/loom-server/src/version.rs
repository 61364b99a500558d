// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Build information for loom-server.

/// Compile-time build metadata.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
	pub version: &'static str,
	pub git_sha: &'static str,
	pub build_timestamp: &'static str,
	pub platform: &'static str,
}

impl BuildInfo {
	pub fn current() -> Self {
		Self {
			version: env!("CARGO_PKG_VERSION"),
			git_sha: option_env!("LOOM_GIT_SHA").unwrap_or("unknown"),
			build_timestamp: option_env!("LOOM_BUILD_TIMESTAMP").unwrap_or("unknown"),
			platform: std::env::consts::OS,
		}
	}
}

/// Format version info for display.
pub fn format_version_info() -> String {
	let info = BuildInfo::current();
	format!(
		"loom-server version: {}\n\
         Git SHA:             {}\n\
         Built at:            {}\n\
         Platform:            {}-{}",
		info.version,
		info.git_sha,
		info.build_timestamp,
		info.platform,
		std::env::consts::ARCH,
	)
}
