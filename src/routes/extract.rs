use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;

use crate::app_state::AppState;
use crate::db::queries::JobScope;
use crate::db::user_queries;
use crate::error::ApiError;
use crate::models::user::User;
use crate::services::auth::SessionClaims;

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
pub struct AuthUser {
    pub user: User,
    pub claims: SessionClaims,
}

impl AuthUser {
    /// Jobs this caller may read and modify.
    pub fn scope(&self) -> JobScope {
        JobScope::for_user(self.user.id, self.user.is_staff)
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(ApiError::unauthorized)?;

        authenticate(state, token).await
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve a session token to its user. Expired, malformed and revoked
/// tokens, and tokens of deleted users, are all rejected with 401.
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    let claims = state
        .tokens
        .verify_session(token)
        .map_err(|_| ApiError::unauthorized())?;

    if user_queries::is_token_revoked(&state.db, claims.jti).await? {
        tracing::debug!(user_id = %claims.sub, "Rejected revoked token");
        return Err(ApiError::unauthorized());
    }

    let user = user_queries::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(ApiError::unauthorized)?;

    Ok(AuthUser { user, claims })
}

/// `Json` whose rejections use the API error body.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

/// `Query` whose rejections use the API error body.
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::requests::{JobListQuery, SelectRequest};
    use axum::body::Body;
    use axum::http::{self, header::CONTENT_TYPE, StatusCode};
    use axum::response::IntoResponse;

    fn json_request(body: &str) -> Request {
        http::Request::builder()
            .method("POST")
            .uri("/")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn rejection_of<T>(result: Result<T, ApiError>) -> (StatusCode, serde_json::Value) {
        let Err(err) = result else {
            panic!("expected a rejection");
        };
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_json_rejections_use_error_body() {
        let unknown_slot = ApiJson::<SelectRequest>::from_request(json_request(r#"{"selected":"simulation3"}"#), &()).await;
        let (status, body) = rejection_of(unknown_slot).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");

        let malformed = ApiJson::<SelectRequest>::from_request(json_request("{not json"), &()).await;
        let (status, _) = rejection_of(malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let no_content_type = http::Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(r#"{"selected":null}"#))
            .unwrap();
        let (status, body) = rejection_of(ApiJson::<SelectRequest>::from_request(no_content_type, &()).await).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["code"], "unsupported_media_type");

        let ok = ApiJson::<SelectRequest>::from_request(json_request(r#"{"selected":"simulation1"}"#), &())
            .await
            .unwrap();
        assert!(ok.0.selected.is_some());
    }

    #[tokio::test]
    async fn test_query_rejections_use_error_body() {
        let request = http::Request::builder()
            .uri("/api/jobs/?status=archived")
            .body(Body::empty())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let result = ApiQuery::<JobListQuery>::from_request_parts(&mut parts, &()).await;
        let (status, body) = rejection_of(result).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");

        let request = http::Request::builder()
            .uri("/api/jobs/?status=completed&page=2")
            .body(Body::empty())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let ApiQuery(query) = ApiQuery::<JobListQuery>::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(query.page, Some(2));
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }
}
