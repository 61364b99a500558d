// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Performance benchmarks for the authorization hot paths.
//!
//! Measures:
//! - Decision latency against snapshots of growing size
//! - Route classification against the default allowlist shape
//! - Rate limiter token checks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loom_authz_core::{AuthorizationRequest, Effect, PolicyRow, PolicySnapshot};
use loom_common_routing::{AllowlistRule, Classifier, RouteClass};
use loom_server::RateLimiter;

fn snapshot_with(users: usize) -> PolicySnapshot {
	let mut rows = vec![
		PolicyRow::policy("role:authz-admin", "*", "core.authz", "*", Effect::Allow),
		PolicyRow::policy("role:viewer", "*", "core.authz", "read", Effect::Allow),
		PolicyRow::policy("role:viewer", "*", "core.authz", "manage", Effect::Deny),
	];
	for i in 0..users {
		let role = if i % 2 == 0 { "role:viewer" } else { "role:authz-admin" };
		rows.push(PolicyRow::grouping(
			format!("tenant:t{}:user:u{i}", i % 16),
			role,
			format!("tenant:t{}", i % 16),
		));
	}
	PolicySnapshot::build(rows, "bench")
}

/// Benchmark: engine decisions
///
/// Purpose: Detect regressions in role expansion as the grouping table grows.
fn bench_decide(c: &mut Criterion) {
	let mut group = c.benchmark_group("authz_decide");
	for users in [16usize, 256, 4096] {
		let snapshot = snapshot_with(users);
		let request = AuthorizationRequest::new(
			"tenant:t3:user:u3",
			"tenant:t3",
			"core.authz",
			"manage",
		);
		group.bench_with_input(BenchmarkId::from_parameter(users), &request, |b, req| {
			b.iter(|| black_box(snapshot.decide(black_box(req))));
		});
	}
	group.finish();
}

/// Benchmark: route classification
fn bench_classify(c: &mut Criterion) {
	let classifier = Classifier::new([
		AllowlistRule::new("/core/api/authz", RouteClass::InternalApi),
		AllowlistRule::new("/api", RouteClass::PublicApi),
		AllowlistRule::new("/webhooks", RouteClass::Webhook),
		AllowlistRule::new("/debug", RouteClass::Ops),
		AllowlistRule::new("/__test__", RouteClass::Test),
		AllowlistRule::new("/static", RouteClass::Static),
		AllowlistRule::new("/", RouteClass::Ui),
	]);
	let paths = [
		"/core/api/authz/requests/42/approve",
		"/webhooks/github",
		"/debug/prometheus",
		"/settings/profile",
	];
	c.bench_function("classify_path", |b| {
		b.iter(|| {
			for path in paths {
				black_box(classifier.classify_path(black_box(path)));
			}
		});
	});
}

/// Benchmark: rate limiter checks across a handful of endpoints
fn bench_rate_limiter(c: &mut Criterion) {
	let runtime = tokio::runtime::Runtime::new().unwrap();
	let limiter = RateLimiter::with_rate(1_000_000.0, u32::MAX);
	c.bench_function("rate_limiter_check", |b| {
		b.to_async(&runtime).iter(|| async {
			let _ = black_box(limiter.check(black_box("core.api.authz.debug:tenant:t1")).await);
		});
	});
}

criterion_group!(benches, bench_decide, bench_classify, bench_rate_limiter);
criterion_main!(benches);
