use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::routes::extract::ApiQuery;
use crate::services::images::ImageKind;

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub token: Option<String>,
}

/// GET /media/{*key}?token=...: decrypt and serve a stored image.
///
/// The token is a short-lived signature bound to this exact key, handed out
/// in job payloads. Anything else is a 403.
pub async fn serve_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
    ApiQuery(query): ApiQuery<MediaQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let forbidden = || ApiError::Forbidden("Invalid or expired media link".to_string());
    let token = query.token.as_deref().ok_or_else(forbidden)?;
    state.media.verify(token, &key).map_err(|_| forbidden())?;

    let data = state.images.get_image(&key).await?;
    let content_type = ImageKind::detect(&data)
        .map(ImageKind::mime)
        .unwrap_or("application/octet-stream");

    Ok((
        [(CONTENT_TYPE, content_type), (CACHE_CONTROL, "private, max-age=300")],
        data,
    ))
}
