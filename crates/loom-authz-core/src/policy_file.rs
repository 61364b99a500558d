// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! CSV policy file format.
//!
//! ```text
//! # comment
//! p, <subject>, <domain>, <object>[, <action>[, <effect>]]
//! g, <subject>, <role>[, <domain>]
//! g2, <subject>, <role>[, <domain>]
//! ```
//!
//! Fields are trimmed. Double-quoted fields may contain commas, and `""`
//! inside quotes is an escaped quote. A missing action is `*`, a missing
//! effect is `allow` and a missing grouping domain is `*`.

use crate::types::{Effect, PolicyRow, PolicyType, WILDCARD};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("policy file line {line}: {message}")]
pub struct PolicyParseError {
	pub line: usize,
	pub message: String,
}

pub fn parse_policy_csv(input: &str) -> Result<Vec<PolicyRow>, PolicyParseError> {
	let mut rows = Vec::new();
	for (idx, raw) in input.lines().enumerate() {
		let line = raw.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		let row = parse_line(line).map_err(|message| PolicyParseError {
			line: idx + 1,
			message,
		})?;
		rows.push(row);
	}
	Ok(rows)
}

fn parse_line(line: &str) -> Result<PolicyRow, String> {
	let fields = split_fields(line)?;
	let ptype: PolicyType = fields[0].parse()?;
	let get = |idx: usize| fields.get(idx).map(String::as_str).unwrap_or("");

	let row = if ptype.is_grouping() {
		if fields.len() < 3 {
			return Err(format!("{ptype} row needs at least 3 columns"));
		}
		if fields.len() > 4 {
			return Err(format!("{ptype} row has too many columns"));
		}
		let domain = match get(3) {
			"" => WILDCARD,
			d => d,
		};
		PolicyRow {
			ptype,
			subject: get(1).to_string(),
			domain: domain.to_string(),
			object: get(2).to_string(),
			action: WILDCARD.to_string(),
			effect: Effect::Allow,
		}
	} else {
		if fields.len() < 4 {
			return Err("p row needs at least 4 columns".to_string());
		}
		if fields.len() > 6 {
			return Err("p row has too many columns".to_string());
		}
		PolicyRow {
			ptype,
			subject: get(1).to_string(),
			domain: get(2).to_string(),
			object: get(3).to_string(),
			action: get(4).to_string(),
			effect: get(5).parse()?,
		}
	}
	.normalized();

	row.validate()?;
	Ok(row)
}

fn split_fields(line: &str) -> Result<Vec<String>, String> {
	let mut fields = Vec::new();
	let mut current = String::new();
	let mut chars = line.chars().peekable();
	let mut in_quotes = false;
	let mut quoted = false;

	while let Some(c) = chars.next() {
		if in_quotes {
			if c == '"' {
				if chars.peek() == Some(&'"') {
					current.push('"');
					chars.next();
				} else {
					in_quotes = false;
				}
			} else {
				current.push(c);
			}
			continue;
		}

		match c {
			'"' if current.trim().is_empty() && !quoted => {
				current.clear();
				in_quotes = true;
				quoted = true;
			}
			'"' => return Err("unexpected quote".to_string()),
			',' => {
				fields.push(finish_field(&current, quoted));
				current.clear();
				quoted = false;
			}
			_ if quoted => {
				if !c.is_whitespace() {
					return Err("unexpected character after closing quote".to_string());
				}
			}
			_ => current.push(c),
		}
	}

	if in_quotes {
		return Err("unterminated quoted field".to_string());
	}
	fields.push(finish_field(&current, quoted));
	Ok(fields)
}

fn finish_field(raw: &str, quoted: bool) -> String {
	if quoted {
		raw.to_string()
	} else {
		raw.trim().to_string()
	}
}

fn quote_field(value: &str) -> String {
	let needs_quotes = value.is_empty()
		|| value.contains([',', '"', '\n'])
		|| value.starts_with('#')
		|| value.trim() != value;
	if needs_quotes {
		format!("\"{}\"", value.replace('"', "\"\""))
	} else {
		value.to_string()
	}
}

/// Serialize rows in file order, `p` rows first, then grouping rows.
///
/// When `header` is given it is written as a leading comment line.
pub fn write_policy_csv(rows: &[PolicyRow], header: Option<&str>) -> String {
	let mut out = String::new();
	if let Some(header) = header {
		for line in header.lines() {
			out.push_str("# ");
			out.push_str(line);
			out.push('\n');
		}
	}

	let policies = rows.iter().filter(|r| !r.ptype.is_grouping());
	let groupings = rows.iter().filter(|r| r.ptype.is_grouping());
	for row in policies.chain(groupings) {
		let fields: Vec<&str> = if row.ptype.is_grouping() {
			vec![row.ptype.as_str(), &row.subject, &row.object, &row.domain]
		} else {
			vec![
				row.ptype.as_str(),
				&row.subject,
				&row.domain,
				&row.object,
				&row.action,
				row.effect.as_str(),
			]
		};
		let line = fields
			.into_iter()
			.map(quote_field)
			.collect::<Vec<_>>()
			.join(", ");
		out.push_str(&line);
		out.push('\n');
	}
	out
}


#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	fn field() -> impl Strategy<Value = String> {
		"[a-z:.,\"*]{1,12}".prop_filter("non-blank", |s| !s.trim().is_empty())
	}

	fn row() -> impl Strategy<Value = PolicyRow> {
		(field(), field(), field(), "[a-z]{1,6}", any::<bool>()).prop_map(|(s, d, o, a, deny)| {
			PolicyRow::policy(s, d, o, a, if deny { Effect::Deny } else { Effect::Allow })
		})
	}

	proptest! {
		#[test]
		fn prop_write_parse_preserves_rows(rows in proptest::collection::vec(row(), 0..20)) {
			let parsed = parse_policy_csv(&write_policy_csv(&rows, None)).unwrap();
			prop_assert_eq!(parsed, rows);
		}
	}
}
