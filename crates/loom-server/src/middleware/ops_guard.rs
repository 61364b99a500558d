// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Production guard for `ops` routes.
//!
//! A request passes when any of these hold:
//! - the client address is inside a configured CIDR
//! - `X-Ops-Token` or `Authorization: Bearer` carries the shared token
//! - HTTP basic credentials match
//!
//! Anything else gets a 404 so the route's existence is not revealed.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
	extract::{ConnectInfo, Request, State},
	http::{header, HeaderMap, HeaderName},
	middleware::Next,
	response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ipnet::IpNet;
use loom_common_routing::RouteClass;
use loom_server_config::OpsGuardConfig;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::{api_response::ApiError, error::ServerError};

pub const OPS_TOKEN_HEADER: &str = "x-ops-token";

#[derive(Clone, Default)]
pub struct OpsGuard {
	active: bool,
	networks: Vec<IpNet>,
	token: Option<String>,
	basic: Option<(String, String)>,
	real_ip_header: Option<HeaderName>,
}

impl std::fmt::Debug for OpsGuard {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OpsGuard")
			.field("active", &self.active)
			.field("networks", &self.networks)
			.field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
			.field("basic", &self.basic.as_ref().map(|(user, _)| user))
			.field("real_ip_header", &self.real_ip_header)
			.finish()
	}
}

fn parse_network(raw: &str) -> Result<IpNet, ServerError> {
	if let Ok(net) = raw.parse::<IpNet>() {
		return Ok(net);
	}
	let addr: IpAddr = raw
		.parse()
		.map_err(|_| ServerError::OpsGuard(format!("invalid CIDR '{raw}'")))?;
	let prefix = if addr.is_ipv4() { 32 } else { 128 };
	IpNet::new(addr, prefix).map_err(|e| ServerError::OpsGuard(format!("invalid CIDR '{raw}': {e}")))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
	a.as_bytes().ct_eq(b.as_bytes()).into()
}

impl OpsGuard {
	/// The guard is only active in production with the guard enabled.
	pub fn from_config(config: &OpsGuardConfig, production: bool) -> Result<Self, ServerError> {
		let networks = config
			.allowed_cidrs
			.iter()
			.map(|raw| parse_network(raw))
			.collect::<Result<Vec<_>, _>>()?;
		let real_ip_header = match &config.real_ip_header {
			Some(name) => Some(
				HeaderName::from_bytes(name.as_bytes())
					.map_err(|_| ServerError::OpsGuard(format!("invalid real ip header '{name}'")))?,
			),
			None => None,
		};
		let basic = match (&config.basic_user, &config.basic_password) {
			(Some(user), Some(password)) => Some((user.clone(), password.clone())),
			_ => None,
		};

		Ok(Self {
			active: production && config.enabled,
			networks,
			token: config.token.clone(),
			basic,
			real_ip_header,
		})
	}

	pub fn is_active(&self) -> bool {
		self.active
	}

	pub fn client_ip(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
		let forwarded = self
			.real_ip_header
			.as_ref()
			.and_then(|name| headers.get(name))
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.split(',').next())
			.and_then(|v| v.trim().parse().ok());
		forwarded.or(peer)
	}

	pub fn authorize(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> bool {
		if let Some(ip) = self.client_ip(headers, peer) {
			if self.networks.iter().any(|net| net.contains(&ip)) {
				return true;
			}
		}

		let authorization = headers
			.get(header::AUTHORIZATION)
			.and_then(|v| v.to_str().ok())
			.map(str::trim);

		if let Some(expected) = &self.token {
			let presented = headers
				.get(OPS_TOKEN_HEADER)
				.and_then(|v| v.to_str().ok())
				.map(str::trim)
				.or_else(|| authorization.and_then(|a| a.strip_prefix("Bearer ")));
			if presented.is_some_and(|t| constant_time_eq(t.trim(), expected)) {
				return true;
			}
		}

		if let Some((user, password)) = &self.basic {
			let decoded = authorization
				.and_then(|a| a.strip_prefix("Basic "))
				.and_then(|b| STANDARD.decode(b.trim()).ok())
				.and_then(|bytes| String::from_utf8(bytes).ok());
			if let Some((u, p)) = decoded.as_deref().and_then(|d| d.split_once(':')) {
				// Both comparisons always run.
				let user_ok = constant_time_eq(u, user);
				let password_ok = constant_time_eq(p, password);
				if user_ok && password_ok {
					return true;
				}
			}
		}

		false
	}
}

pub async fn ops_guard(State(guard): State<Arc<OpsGuard>>, req: Request, next: Next) -> Response {
	let class = req.extensions().get::<RouteClass>().copied();
	if !guard.is_active() || class != Some(RouteClass::Ops) {
		return next.run(req).await;
	}

	let peer = req
		.extensions()
		.get::<ConnectInfo<SocketAddr>>()
		.map(|info| info.0.ip());
	if guard.authorize(req.headers(), peer) {
		return next.run(req).await;
	}

	let path = req.uri().path().to_string();
	warn!(path = %path, peer = ?peer, "ops guard rejected request");
	ApiError::not_found(&path).into_class_response(RouteClass::Ops)
}
