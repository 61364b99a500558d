// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Prometheus metrics for authorization decisions.

use std::sync::Arc;
use std::time::Duration;

use loom_authz_core::{DecisionObserver, Mode};
use prometheus::{Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

const DEBUG_LATENCY_BUCKETS: [f64; 12] = [
	0.0005, 0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0,
];

pub struct AuthzMetrics {
	/// Counter with labels: debug endpoint inspections by mode and result
	debug_requests_total: CounterVec,

	/// Histogram: debug inspection latency in seconds
	debug_latency_seconds: Histogram,

	/// Counter with labels: every authorize call by mode and result
	decisions_total: CounterVec,

	/// Counter: snapshot reloads
	policy_reloads_total: Counter,

	registry: Arc<Registry>,
}

impl AuthzMetrics {
	/// # Errors
	/// Returns an error if metric registration fails.
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Arc::new(Registry::new());

		let debug_requests_total = CounterVec::new(
			Opts::new(
				"authz_debug_requests_total",
				"Authorization debug inspections by mode and result",
			),
			&["mode", "result"],
		)?;
		registry.register(Box::new(debug_requests_total.clone()))?;

		let debug_latency_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"authz_debug_latency_seconds",
				"Latency of authorization debug inspections",
			)
			.buckets(DEBUG_LATENCY_BUCKETS.to_vec()),
		)?;
		registry.register(Box::new(debug_latency_seconds.clone()))?;

		let decisions_total = CounterVec::new(
			Opts::new(
				"authz_decisions_total",
				"Authorization decisions by mode and result",
			),
			&["mode", "result"],
		)?;
		registry.register(Box::new(decisions_total.clone()))?;

		let policy_reloads_total = Counter::with_opts(Opts::new(
			"authz_policy_reloads_total",
			"Policy snapshot reloads",
		))?;
		registry.register(Box::new(policy_reloads_total.clone()))?;

		Ok(Self {
			debug_requests_total,
			debug_latency_seconds,
			decisions_total,
			policy_reloads_total,
			registry,
		})
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	/// Text exposition of every registered metric.
	pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
		let metrics = self.registry.gather();
		let encoder = TextEncoder::new();
		let mut buf = Vec::new();
		encoder.encode(&metrics, &mut buf).map_err(|e| {
			error!(error = %e, "failed to encode metrics");
			prometheus::Error::Msg(format!("Failed to encode metrics: {e}"))
		})?;
		Ok(String::from_utf8_lossy(&buf).to_string())
	}
}

fn result_label(allowed: bool) -> &'static str {
	if allowed {
		"allowed"
	} else {
		"denied"
	}
}

impl DecisionObserver for AuthzMetrics {
	fn record_decision(&self, mode: Mode, allowed: bool) {
		self.decisions_total
			.with_label_values(&[mode.as_str(), result_label(allowed)])
			.inc();
	}

	fn record_inspection(&self, mode: Mode, allowed: bool, latency: Duration) {
		self.debug_requests_total
			.with_label_values(&[mode.as_str(), result_label(allowed)])
			.inc();
		self.debug_latency_seconds.observe(latency.as_secs_f64());
	}

	fn record_reload(&self) {
		self.policy_reloads_total.inc();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_exposition_contains_recorded_series() {
		let metrics = AuthzMetrics::new().unwrap();
		metrics.record_decision(Mode::Enforce, false);
		metrics.record_inspection(Mode::Shadow, true, Duration::from_micros(700));
		metrics.record_reload();

		let text = metrics.gather_metrics().unwrap();
		assert!(text.contains(r#"authz_decisions_total{mode="enforce",result="denied"} 1"#));
		assert!(text.contains(r#"authz_debug_requests_total{mode="shadow",result="allowed"} 1"#));
		assert!(text.contains("authz_debug_latency_seconds_bucket{le=\"0.001\"} 1"));
		assert!(text.contains("authz_policy_reloads_total 1"));
	}
}
