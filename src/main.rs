use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

mod api;
mod auth;
mod chat;
mod config;
mod db;
mod error;
mod handlers;
mod hub;
mod models;
mod permissions;
mod presence;
mod protocol;
mod session;
mod state;
mod store;
mod typing;

use crate::config::AppConfig;
use crate::models::{ChannelType, InvitePolicy};
use crate::state::AppState;
use crate::store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    match config.logging.format.as_str() {
        "json" => fmt().with_env_filter(filter).json().init(),
        _ => fmt().with_env_filter(filter).init(),
    }

    tracing::info!("starting concord server v{}", env!("CARGO_PKG_VERSION"));

    let db_pool = db::init_pool(&config.database).await?;
    tracing::info!("database connected");

    db::run_migrations(&db_pool).await?;
    tracing::info!("migrations complete");

    ensure_default_server(&db_pool).await?;

    let state = AppState::new(Arc::new(PgStore(db_pool)), config.clone());
    let sweeper = state.typing.clone().spawn_sweeper();

    let app = api::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("gateway listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("concord server stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    tracing::info!("shutdown signal received");
}

/// `EnsureDefaultServer` (§6.4): seed a single default server, its @everyone
/// and Admin roles, and a #general text channel if no server exists yet.
/// Idempotent — safe to call on every startup.
async fn ensure_default_server(pool: &PgPool) -> Result<()> {
    let existing = db::servers::list_all(pool).await?;
    if !existing.is_empty() {
        tracing::info!("found {} server(s), skipping default-server seed", existing.len());
        return Ok(());
    }

    tracing::info!("no servers found — seeding the default server");

    // System-owned placeholder; the first registered user claims ownership
    // on the first `register` call that finds this server still system-owned.
    let system_owner = Uuid::nil();
    let server_id = Uuid::now_v7();
    let server = db::servers::create(pool, server_id, "Concord", None, system_owner, 0, InvitePolicy::Open).await?;

    let everyone_id = Uuid::now_v7();
    db::roles::create(pool, everyone_id, server.id, "@everyone", 0, 0, 0, true).await?;

    // Admin role, granted to whichever account's email matches `server.admin_email`
    // on its first `register` call (see `api::register`).
    let admin_role_id = Uuid::now_v7();
    db::roles::create(
        pool,
        admin_role_id,
        server.id,
        "Admin",
        0xE91E63,
        crate::permissions::Permissions::ADMINISTRATOR.bits(),
        1,
        false,
    )
    .await?;

    let general_id = Uuid::now_v7();
    db::channels::create(pool, general_id, Some(server.id), "general", None, ChannelType::Text, 0, None).await?;

    db::servers::set_default_channels(pool, server.id, general_id, general_id).await?;

    tracing::info!("default server seeded with #general");
    Ok(())
}
