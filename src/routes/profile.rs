use axum::extract::State;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::db::user_queries;
use crate::error::ApiError;
use crate::models::requests::ProfileUpdateRequest;
use crate::models::responses::ProfileResponse;
use crate::models::user::ProfileChanges;
use crate::routes::extract::{ApiJson, AuthUser};

/// GET /api/profile
pub async fn get_profile(auth: AuthUser) -> Json<ProfileResponse> {
    Json(ProfileResponse::from(&auth.user))
}

/// PATCH /api/profile
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(request): ApiJson<ProfileUpdateRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let request = request.trimmed();
    request.validate()?;

    let changes = ProfileChanges {
        first_name: request.first_name,
        last_name: request.last_name,
        age: request.age,
        gender: request.gender,
        phone: request.phone,
        bio: request.bio,
    };
    let user = user_queries::update_profile(&state.db, auth.user.id, &changes).await?;
    Ok(Json(ProfileResponse::from(&user)))
}
