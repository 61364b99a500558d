// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::OnceLock;

use regex::Regex;

use crate::allowlist::AllowlistRule;
use crate::class::RouteClass;

const PUBLIC_API_PREFIX: &str = "/api/v1";

fn internal_api_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| match Regex::new(r"^/[^/]+/api(?:/|$)") {
		Ok(re) => re,
		Err(e) => unreachable!("static internal api pattern is valid: {e}"),
	})
}

/// Maps request paths onto [`RouteClass`] using allowlist rules.
///
/// Rules are tried longest prefix first. Paths no rule matches fall back to
/// `public_api` under `/api/v1`, `internal_api` for `/<module>/api`, and `ui`
/// for everything else, so classification is total.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
	rules: Vec<AllowlistRule>,
}

impl Classifier {
	pub fn new(rules: impl IntoIterator<Item = AllowlistRule>) -> Self {
		let mut rules: Vec<AllowlistRule> = rules
			.into_iter()
			.filter_map(|mut rule| {
				rule.prefix = rule.prefix.trim().to_string();
				(!rule.prefix.is_empty()).then_some(rule)
			})
			.collect();

		// Stable sort keeps file order among equal-length prefixes.
		rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

		Self { rules }
	}

	pub fn rules(&self) -> &[AllowlistRule] {
		&self.rules
	}

	/// Returns the class of the first allowlist rule matching `path`.
	pub fn match_allowlist(&self, path: &str) -> Option<RouteClass> {
		self
			.rules
			.iter()
			.find(|rule| has_path_prefix_on_boundary(path, &rule.prefix))
			.map(|rule| rule.class)
	}

	#[tracing::instrument(level = "trace", skip(self), ret)]
	pub fn classify_path(&self, path: &str) -> RouteClass {
		if let Some(class) = self.match_allowlist(path) {
			return class;
		}

		if has_path_prefix_on_boundary(path, PUBLIC_API_PREFIX) {
			return RouteClass::PublicApi;
		}
		if internal_api_pattern().is_match(path) {
			return RouteClass::InternalApi;
		}
		RouteClass::Ui
	}
}

/// Prefix match that only succeeds on a path segment boundary.
///
/// `/api` matches `/api` and `/api/x` but not `/apikeys`. A prefix ending in
/// `/` matches anything beneath it, and `/` matches every absolute path.
pub fn has_path_prefix_on_boundary(path: &str, prefix: &str) -> bool {
	if prefix.is_empty() {
		return false;
	}
	if prefix == "/" {
		return path.starts_with('/');
	}
	if !path.starts_with(prefix) {
		return false;
	}
	if path.len() == prefix.len() || prefix.ends_with('/') {
		return true;
	}
	path.as_bytes()[prefix.len()] == b'/'
}

#[cfg(test)]
mod tests {
	use super::*;

	fn server_rules() -> Vec<AllowlistRule> {
		vec![
			AllowlistRule::new("/api/v1", RouteClass::PublicApi),
			AllowlistRule::new("/health", RouteClass::Ops),
			AllowlistRule::new("/debug/prometheus", RouteClass::Ops),
			AllowlistRule::new("/webhooks", RouteClass::Webhook),
			AllowlistRule::new("/webhooks/internal", RouteClass::InternalApi),
			AllowlistRule::new("  ", RouteClass::Static),
		]
	}

	#[test]
	fn test_boundary_examples() {
		assert!(has_path_prefix_on_boundary("/api", "/api"));
		assert!(has_path_prefix_on_boundary("/api/v1", "/api"));
		assert!(!has_path_prefix_on_boundary("/apikeys", "/api"));
		assert!(has_path_prefix_on_boundary("/static/app.js", "/static/"));
		assert!(has_path_prefix_on_boundary("/anything", "/"));
		assert!(!has_path_prefix_on_boundary("/anything", ""));
		assert!(!has_path_prefix_on_boundary("relative", "/"));
	}

	#[test]
	fn test_empty_prefixes_dropped() {
		let classifier = Classifier::new(server_rules());
		assert_eq!(classifier.rules().len(), 5);
	}

	#[test]
	fn test_longest_prefix_wins() {
		let classifier = Classifier::new(server_rules());
		assert_eq!(
			classifier.classify_path("/webhooks/internal/sync"),
			RouteClass::InternalApi
		);
		assert_eq!(
			classifier.classify_path("/webhooks/github"),
			RouteClass::Webhook
		);
	}

	#[test]
	fn test_allowlist_match() {
		let classifier = Classifier::new(server_rules());
		assert_eq!(classifier.match_allowlist("/health"), Some(RouteClass::Ops));
		assert_eq!(classifier.match_allowlist("/healthz"), None);
	}

	#[test]
	fn test_fallbacks_without_rules() {
		let classifier = Classifier::default();
		assert_eq!(classifier.classify_path("/api/v1/foo"), RouteClass::PublicApi);
		assert_eq!(classifier.classify_path("/api/v1"), RouteClass::PublicApi);
		assert_eq!(classifier.classify_path("/core/api/bar"), RouteClass::InternalApi);
		assert_eq!(classifier.classify_path("/core/api"), RouteClass::InternalApi);
		assert_eq!(classifier.classify_path("/core/apis"), RouteClass::Ui);
		assert_eq!(classifier.classify_path("/users"), RouteClass::Ui);
		assert_eq!(classifier.classify_path(""), RouteClass::Ui);
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn prop_classification_is_total(path in "\\PC*") {
			let classifier = Classifier::new(vec![
				AllowlistRule::new("/ops", RouteClass::Ops),
				AllowlistRule::new("/", RouteClass::Static),
			]);
			let class = classifier.classify_path(&path);
			prop_assert!(RouteClass::ALL.contains(&class));
		}

		#[test]
		fn prop_prefix_matches_itself_and_children(
			prefix in "(/[a-z]{1,8}){1,3}",
			child in "[a-z]{1,8}",
		) {
			let child_path = format!("{prefix}/{child}");
			let glued = format!("{prefix}{child}");
			prop_assert!(has_path_prefix_on_boundary(&prefix, &prefix));
			prop_assert!(has_path_prefix_on_boundary(&child_path, &prefix));
			prop_assert!(!has_path_prefix_on_boundary(&glued, &prefix));
		}
	}
}
