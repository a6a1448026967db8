//! Auth (C7): opaque bearer tokens, SHA-256 digested at rest, 30-day expiry.
//!
//! The raw token is never persisted, only its digest, so a self-verifying
//! JWT scheme doesn't fit; password hashing goes through argon2.

use argon2::{
    password_hash::{rand_core::OsRng as ArgonOsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::store::Store;

pub const TOKEN_TTL_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("token not recognized")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("store error")]
    Store(#[from] sqlx::Error),
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut ArgonOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Hash(e.to_string()))?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

/// 64 hex-digit opaque token — 256 bits of entropy, collision impossible by construction.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn digest_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Issue a new session for `user_id`, persisting only the digest. Returns the
/// raw token — this is the only moment it ever exists outside the client.
pub async fn issue_session(
    store: &dyn Store,
    user_id: Uuid,
    ip: Option<String>,
    user_agent: Option<String>,
) -> Result<String, AuthError> {
    let token = generate_token();
    let digest = digest_token(&token);
    let now = Utc::now();
    let expires_at = now + ChronoDuration::days(TOKEN_TTL_DAYS);

    store.sessions_create(Uuid::new_v4(), user_id, digest, now, expires_at, ip, user_agent).await?;
    Ok(token)
}

/// Resolve a raw token to a user id, updating `last_used_at` on success.
/// An expired row is deleted rather than resolved.
pub async fn resolve(store: &dyn Store, token: &str) -> Result<Uuid, AuthError> {
    let digest = digest_token(token);
    let record = store.sessions_find_by_digest(&digest).await?.ok_or(AuthError::InvalidToken)?;

    if record.expires_at < Utc::now() {
        store.sessions_delete(record.id).await?;
        return Err(AuthError::Expired);
    }

    store.sessions_touch(record.id).await?;
    Ok(record.user_id)
}

/// Revoke a session by its raw token. Subsequent use closes with AUTH_FAILED.
pub async fn revoke(store: &dyn Store, token: &str) -> Result<(), AuthError> {
    let digest = digest_token(token);
    store.sessions_delete_by_digest(&digest).await?;
    Ok(())
}
