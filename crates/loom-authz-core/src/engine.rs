// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy decision engine.
//!
//! A [`PolicySnapshot`] is an immutable, indexed view of a rule set at one
//! revision. Evaluation has two phases:
//!
//! 1. **Effective subjects**: the request subject plus every role reachable
//!    over `g`/`g2` edges whose domain is the request domain or `*`.
//! 2. **Scan**: every `p` row whose subject, domain, object and action match
//!    (each either equal or `*`) is collected. Any `deny` wins; otherwise any
//!    `allow` allows; otherwise the request is denied.
//!
//! Subjects are interned into an arena so the closure is a BFS over `u32`
//! indices with a visited bitset.

use std::collections::{HashMap, VecDeque};

use tracing::instrument;

use crate::types::{AuthorizationRequest, Effect, PolicyRow, WILDCARD};

#[derive(Debug, Clone, Copy)]
struct Edge {
	role: u32,
	wildcard_domain: bool,
	domain: u32,
}

#[derive(Debug, Clone)]
struct IndexedPolicy {
	subject: Option<u32>,
	row: PolicyRow,
}

/// Immutable rule set at a revision.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
	revision: String,
	rows: Vec<PolicyRow>,
	subjects: Vec<String>,
	subject_index: HashMap<String, u32>,
	domains: HashMap<String, u32>,
	edges: Vec<Vec<Edge>>,
	policies: Vec<IndexedPolicy>,
}

/// Result of the effective-subject closure for one request.
#[derive(Debug, Clone)]
pub struct SubjectSet {
	visited: Vec<bool>,
	known: bool,
}

impl SubjectSet {
	fn contains(&self, id: u32) -> bool {
		self.visited.get(id as usize).copied().unwrap_or(false)
	}

	/// Number of subjects in the closure, including the request subject.
	pub fn len(&self) -> usize {
		if !self.known {
			return 1;
		}
		self.visited.iter().filter(|v| **v).count()
	}

	pub fn is_empty(&self) -> bool {
		false
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
	pub allowed: bool,
	/// Matching `p` rows sorted by subject, domain, object, action and effect.
	pub matched: Vec<PolicyRow>,
}

impl Decision {
	pub fn trace(&self) -> Vec<String> {
		self.matched.iter().map(PolicyRow::descriptor).collect()
	}
}

impl PolicySnapshot {
	pub fn build(rows: Vec<PolicyRow>, revision: impl Into<String>) -> Self {
		let mut snapshot = PolicySnapshot {
			revision: revision.into(),
			..Default::default()
		};

		for row in &rows {
			if row.ptype.is_grouping() {
				let member = snapshot.intern(&row.subject);
				let role = snapshot.intern(&row.object);
				let wildcard_domain = row.domain == WILDCARD;
				let next_domain = snapshot.domains.len() as u32;
				let domain = *snapshot
					.domains
					.entry(row.domain.clone())
					.or_insert(next_domain);
				snapshot.edges[member as usize].push(Edge {
					role,
					wildcard_domain,
					domain,
				});
			} else {
				let subject = if row.subject == WILDCARD {
					None
				} else {
					Some(snapshot.intern(&row.subject))
				};
				snapshot.policies.push(IndexedPolicy {
					subject,
					row: row.clone(),
				});
			}
		}

		snapshot.rows = rows;
		snapshot
	}

	pub fn empty(revision: impl Into<String>) -> Self {
		Self::build(Vec::new(), revision)
	}

	fn intern(&mut self, subject: &str) -> u32 {
		if let Some(id) = self.subject_index.get(subject) {
			return *id;
		}
		let id = self.subjects.len() as u32;
		self.subjects.push(subject.to_string());
		self.subject_index.insert(subject.to_string(), id);
		self.edges.push(Vec::new());
		id
	}

	pub fn revision(&self) -> &str {
		&self.revision
	}

	pub fn rows(&self) -> &[PolicyRow] {
		&self.rows
	}

	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}

	/// Transitive closure of `subject` over grouping edges valid in `domain`.
	pub fn effective_subjects(&self, subject: &str, domain: &str) -> SubjectSet {
		let mut visited = vec![false; self.subjects.len()];
		let Some(start) = self.subject_index.get(subject).copied() else {
			return SubjectSet {
				visited,
				known: false,
			};
		};
		let domain_id = self.domains.get(domain).copied();

		let mut queue = VecDeque::from([start]);
		visited[start as usize] = true;
		while let Some(current) = queue.pop_front() {
			for edge in &self.edges[current as usize] {
				let applies = edge.wildcard_domain || Some(edge.domain) == domain_id;
				if applies && !visited[edge.role as usize] {
					visited[edge.role as usize] = true;
					queue.push_back(edge.role);
				}
			}
		}

		SubjectSet {
			visited,
			known: true,
		}
	}

	/// Scan `p` rows against a precomputed subject closure.
	pub fn evaluate(&self, request: &AuthorizationRequest, subjects: &SubjectSet) -> Decision {
		let action = request.action.trim().to_lowercase();
		let mut matched: Vec<PolicyRow> = self
			.policies
			.iter()
			.filter(|p| match p.subject {
				None => true,
				Some(id) => subjects.contains(id),
			})
			.filter(|p| p.row.domain == request.domain || p.row.domain == WILDCARD)
			.filter(|p| p.row.object == request.object || p.row.object == WILDCARD)
			.filter(|p| p.row.action == action || p.row.action == WILDCARD)
			.map(|p| p.row.clone())
			.collect();

		matched.sort_by(|a, b| {
			(&a.subject, &a.domain, &a.object, &a.action, a.effect)
				.cmp(&(&b.subject, &b.domain, &b.object, &b.action, b.effect))
		});
		matched.dedup();

		let denied = matched.iter().any(|r| r.effect == Effect::Deny);
		let allowed = !denied && matched.iter().any(|r| r.effect == Effect::Allow);
		Decision { allowed, matched }
	}

	#[instrument(
		level = "trace",
		skip(self, request),
		fields(
			revision = %self.revision,
			subject = %request.subject,
			domain = %request.domain,
			object = %request.object,
			action = %request.action,
		)
	)]
	pub fn decide(&self, request: &AuthorizationRequest) -> Decision {
		let subjects = self.effective_subjects(&request.subject, &request.domain);
		self.evaluate(request, &subjects)
	}
}
