// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Loom authorization server binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use loom_authz_core::{parse_policy_csv, PolicyType};
use loom_server::{create_app_state, create_router, version};
use loom_server_config::{LogFormat, ServerConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Loom server - HTTP server for authorization policy management.
#[derive(Parser, Debug)]
#[command(
	name = "loom-server",
	about = "Loom authorization and policy lifecycle server",
	version
)]
struct Args {
	/// Path to a TOML configuration file
	#[arg(long, env = "LOOM_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the HTTP server (default)
	Serve,
	/// Parse a policy CSV file and report row counts
	CheckPolicy {
		/// Policy file to validate
		path: PathBuf,
	},
	/// Show version and build information
	Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	match args.command {
		Some(Command::Version) => {
			println!("{}", version::format_version_info());
			return Ok(());
		}
		Some(Command::CheckPolicy { path }) => return check_policy(&path),
		Some(Command::Serve) | None => {}
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => loom_server_config::load_config_with_file(path.clone())?,
		None => loom_server_config::load_config()?,
	};
	init_tracing(&config);

	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		mode = %config.authz.mode,
		"starting loom-server"
	);

	let pool = loom_server_db::create_pool(&config.database.url).await?;
	loom_server_db::run_migrations(&pool).await?;

	let state = create_app_state(pool, &config).await?;
	let shutdown = state.shutdown.clone();
	let app = create_router(state);

	let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
	tracing::info!(addr = %config.socket_addr(), "listening");

	axum::serve(
		listener,
		app.into_make_service_with_connect_info::<SocketAddr>(),
	)
	.with_graceful_shutdown(async move {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %e, "failed to install ctrl-c handler");
		}
		tracing::info!("shutdown signal received");
		shutdown.cancel();
	})
	.await?;

	tracing::info!("loom-server stopped");
	Ok(())
}

fn init_tracing(config: &ServerConfig) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	match config.logging.format {
		LogFormat::Json => registry.with(fmt::layer().json()).init(),
		LogFormat::Text => registry.with(fmt::layer()).init(),
	}
}

fn check_policy(path: &Path) -> anyhow::Result<()> {
	let raw = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read {}", path.display()))?;
	let rows = parse_policy_csv(&raw)?;
	let policies = rows.iter().filter(|r| r.ptype == PolicyType::Policy).count();
	println!(
		"{}: {} rows ({} policies, {} groupings)",
		path.display(),
		rows.len(),
		policies,
		rows.len() - policies
	);
	Ok(())
}
