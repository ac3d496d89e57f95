use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use crate::{
    auth::{verify_jwt, SESSION_COOKIE},
    error::AppError,
    state::AppState,
};

/// Resolve the session token and store the user id in the request extensions.
///
/// The token may arrive as `Authorization: Bearer`, as the session cookie or
/// as a `token` query parameter (browsers cannot set headers on a WebSocket
/// upgrade).
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token(req.headers(), req.uri().query()).ok_or_else(unauthorized)?;

    let claims = verify_jwt(&token, &state.config.jwt_secret)?;
    let user_id = claims.user_id()?;

    req.extensions_mut().insert(user_id);

    Ok(next.run(req).await)
}

/// Header first, then cookie, then query string.
pub fn session_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    from_header
        .or_else(|| {
            CookieJar::from_headers(headers)
                .get(SESSION_COOKIE)
                .map(|c| c.value().to_string())
                .filter(|t| !t.is_empty())
        })
        .or_else(|| query.and_then(token_from_query))
}

fn token_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value.to_string())
        .filter(|t| !t.is_empty())
}

fn unauthorized() -> AppError {
    AppError::Unauthorized("Unauthorized".to_string())
}

// Extractor for getting user_id from request extensions
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Uuid>()
            .copied()
            .map(AuthUser)
            .ok_or_else(unauthorized)
    }
}
