use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::{error, info};
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;

/// Token lifetime handed out by register and login.
const TOKEN_TTL_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name_len = req.username.chars().count();
    if !(3..=32).contains(&name_len) {
        return Err(ApiError::BadRequest("username must be 3 to 32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }

    let user_id = Uuid::new_v4();
    let username = req.username.clone();

    // Argon2 and SQLite both block; keep them off the async runtime
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        // Fast path; create_user still rejects a name taken while hashing
        if db.get_user_by_username(&req.username)?.is_some() {
            return Err(ApiError::Conflict("username already taken".into()));
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
            .to_string();

        db.create_user(&user_id.to_string(), &req.username, &password_hash)?;
        Ok::<_, ApiError>(())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })??;

    let token = create_token(&state.jwt_secret, user_id, &username)?;
    info!("Registered user {} ({})", username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let user = db
            .get_user_by_username(&req.username)?
            .ok_or(ApiError::Unauthorized)?;

        // Verify password
        {
            let parsed_hash = PasswordHash::new(&user.password)
                .map_err(|e| anyhow::anyhow!("stored password hash for {} is invalid: {}", user.username, e))?;

            Argon2::default()
                .verify_password(req.password.as_bytes(), &parsed_hash)
                .map_err(|_| ApiError::Unauthorized)?;
        }

        Ok::<_, ApiError>(user)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })??;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
