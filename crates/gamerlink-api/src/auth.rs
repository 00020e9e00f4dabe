use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use gamerlink_db::Database;
use gamerlink_db::models::UserRow;
use gamerlink_gateway::auth::JwtKeys;
use gamerlink_gateway::registry::ConnectionRegistry;
use gamerlink_types::api::{LoginRequest, RegisterRequest, TokenResponse};

use crate::error::{ApiError, run_blocking};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub tokens: JwtKeys,
    pub registry: ConnectionRegistry,
}

const MIN_PASSWORD_LEN: usize = 8;
const MAX_EMAIL_LEN: usize = 254;

/// Trim and lower-case an email, rejecting anything without a local part and domain.
pub(crate) fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    let valid = email.len() <= MAX_EMAIL_LEN
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !valid {
        return Err(ApiError::BadRequest("Invalid email address"));
    }
    Ok(email)
}

/// Blank game names are stored as "no game".
pub(crate) fn normalize_game(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|g| !g.is_empty()).map(str::to_string)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email)?;
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest("Password must be at least 8 characters"));
    }
    let game = normalize_game(req.game.as_deref());

    let password_hash = hash_password(&req.password)?;

    let user = run_blocking(&state.db, move |db| {
        db.create_user(&email, &password_hash, game.as_deref())
    })
    .await?
    .ok_or(ApiError::Conflict("Email already registered"))?;

    info!("Registered user {} ({})", user.email, user.id);
    let response = token_response(&state, &user)?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = run_blocking(&state.db, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash unreadable: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    if !user.is_active {
        return Err(ApiError::Unauthorized);
    }

    Ok(Json(token_response(&state, &user)?))
}

/// Argon2id with a fresh OS-random salt.
fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

fn token_response(state: &AppStateInner, user: &UserRow) -> Result<TokenResponse, ApiError> {
    let access_token = state.tokens.issue(user.id, &user.email)?;
    Ok(TokenResponse {
        user: user.summary(),
        access_token,
        token_type: "bearer".to_string(),
    })
}
