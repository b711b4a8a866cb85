use axum::extract::State;
use axum::http::{header::SET_COOKIE, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::user_queries;
use crate::error::ApiError;
use crate::models::requests::{LoginRequest, RegisterRequest};
use crate::models::responses::{AuthResponse, CsrfResponse, CurrentUser};
use crate::models::user::{NewUser, User};
use crate::routes::extract::{ApiJson, AuthUser};
use crate::services::auth::{hash_password_blocking, verify_password_blocking};

fn session_for(state: &AppState, user: &User, message: &str) -> Result<AuthResponse, ApiError> {
    let issued = state.tokens.issue_session(user.id, user.is_staff)?;
    Ok(AuthResponse {
        message: message.to_string(),
        expires_at: issued.claims.expires_at(),
        token: issued.token,
        user: CurrentUser::from(user),
    })
}

/// GET /api/auth/csrf
///
/// Sessions are bearer tokens, so nothing checks this value. The SPA
/// still fetches it before its first write.
pub async fn csrf_token() -> impl IntoResponse {
    let token = Uuid::new_v4().simple().to_string();
    let cookie = format!("csrftoken={token}; Path=/; SameSite=Lax");
    ([(SET_COOKIE, cookie)], Json(CsrfResponse { csrf_token: token }))
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    request.validate()?;

    let password_hash = hash_password_blocking(request.password).await?;
    let user = user_queries::create_user(
        &state.db,
        &NewUser {
            username: request.username,
            email: request.email,
            password_hash,
            first_name: request.first_name,
            last_name: request.last_name,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, "User registered");
    let response = session_for(&state, &user, "Registration successful")?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    request.validate()?;

    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());
    let user = user_queries::find_by_email(&state.db, &request.email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password_blocking(request.password, user.password_hash.clone()).await? {
        tracing::info!(user_id = %user.id, "Failed login attempt");
        return Err(invalid());
    }

    Ok(Json(session_for(&state, &user, "Login successful")?))
}

/// POST /api/auth/logout: revoke the presented token.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> Result<StatusCode, ApiError> {
    user_queries::revoke_token(
        &state.db,
        auth.claims.jti,
        auth.user.id,
        auth.claims.expires_at(),
    )
    .await?;
    tracing::info!(user_id = %auth.user.id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/me
pub async fn me(auth: AuthUser) -> Json<CurrentUser> {
    Json(CurrentUser::from(&auth.user))
}
