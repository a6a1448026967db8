//! Thin HTTP surface: health check and the register/login endpoints that
//! hand a client its bearer token, plus the WebSocket upgrade route that
//! hands the accepted connection to [`crate::session::run`].
//!
//! Everything else in the protocol — servers, channels, messages, roles,
//! bans, presence — happens over the gateway's opcode dispatch table, not
//! REST. Signup UX and password policy beyond basic length bounds are out
//! of scope (see §1); this module only issues the credential a
//! client needs to `identify` on the socket.

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::error::{AppError, AppResult};
use crate::models::{AuthResponse, LoginRequest, RegisterRequest, UserPublic};
use crate::session;
use crate::state::AppState;
use crate::store::Store;

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 32;
const MIN_PASSWORD_LEN: usize = 8;
const DISCRIMINATOR_ATTEMPTS: u32 = 50;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Picks the first unused 4-digit discriminator for `username`, mirroring
/// the (username, discriminator) uniqueness invariant in §3.
async fn allocate_discriminator(store: &dyn Store, username: &str) -> AppResult<i16> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    for _ in 0..DISCRIMINATOR_ATTEMPTS {
        let candidate = rng.gen_range(1..=9999i16);
        if store.users_find_by_username(username, candidate).await?.is_none() {
            return Ok(candidate);
        }
    }
    Err(AppError::Conflict("no discriminator available for this username".into()))
}

async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<AuthResponse>> {
    let username = req.username.trim();
    if username.len() < MIN_USERNAME_LEN || username.len() > MAX_USERNAME_LEN {
        return Err(AppError::BadRequest(format!(
            "username must be {MIN_USERNAME_LEN}-{MAX_USERNAME_LEN} characters"
        )));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if state.db.users_find_by_email(&req.email).await?.is_some() {
        return Err(AppError::Conflict("email already registered".into()));
    }

    let discriminator = allocate_discriminator(state.db.as_ref(), username).await?;

    let password = req.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing task failed: {e}")))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;

    let display_name = req.display_name.clone().unwrap_or_else(|| username.to_string());
    let user_id = uuid::Uuid::now_v7();
    let user = state
        .db
        .users_create(user_id, username, discriminator, &display_name, &req.email, &password_hash)
        .await?;

    // Single-process deployments carry one default server; new accounts join it.
    // The first registrant to find it still system-owned (owner_id == nil) claims it.
    let is_configured_admin = state
        .config
        .server
        .admin_email
        .as_deref()
        .is_some_and(|admin_email| admin_email.eq_ignore_ascii_case(&user.email));

    for server in state.db.servers_list_all().await? {
        let _ = state.db.members_add(user.id, server.id).await;
        if server.owner_id.is_nil() {
            let _ = state.db.servers_update_owner(server.id, user.id).await;
        }
        if is_configured_admin {
            if let Some(admin_role) = state.db.roles_find_by_name(server.id, "Admin").await? {
                state.db.roles_add_member_role(user.id, server.id, admin_role.id).await?;
            }
        }
    }

    let token = auth::issue_session(state.db.as_ref(), user.id, Some(addr.ip().to_string()), None)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;

    Ok(Json(AuthResponse { token, user: UserPublic::from(user) }))
}

async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let user = state.db.users_find_by_email(&req.email).await?.ok_or(AppError::Unauthorized)?;

    let password = req.password.clone();
    let hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password verification task failed: {e}")))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;
    if !valid {
        return Err(AppError::Unauthorized);
    }

    state.db.users_touch_last_seen(user.id).await?;

    let token = auth::issue_session(state.db.as_ref(), user.id, Some(addr.ip().to_string()), None)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;

    Ok(Json(AuthResponse { token, user: UserPublic::from(user) }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: axum::extract::ws::WebSocket, state: AppState) {
    session::run(socket, state).await;
}
