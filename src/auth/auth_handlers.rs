use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::CookieJar;
use validator::Validate;

use crate::{dto::MessageResponse, error::Result, middleware::AuthUser, state::AppState};
use super::{
    auth_dto::{AuthResponse, LoginRequest, SignupRequest, UpdateProfileRequest, UsersResponse},
    cookie::{removal_cookie, session_cookie},
};

/// Create an account and start a session
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<SignupRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let session = state
        .auth_service
        .signup(&payload.name, &payload.email, &payload.password)
        .await?;

    let jar = jar.add(session_cookie(session.token, state.config.production));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse::new(session.user).with_message("Signup successful")),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let session = state
        .auth_service
        .login(&payload.email, &payload.password)
        .await?;

    let jar = jar.add(session_cookie(session.token, state.config.production));
    Ok((jar, Json(AuthResponse::new(session.user))))
}

/// Sessions are stateless, so logging out only expires the cookie
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let jar = jar.remove(removal_cookie(state.config.production));
    (jar, Json(MessageResponse::new("Logged out successfully")))
}

pub async fn me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<AuthResponse>> {
    let user = state.auth_service.current_user(user_id).await?;
    Ok(Json(AuthResponse::new(user)))
}

/// Everyone a task can be assigned to
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> Result<Json<UsersResponse>> {
    let users = state.auth_service.directory().await?;
    Ok(Json(UsersResponse { users }))
}

pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<AuthResponse>> {
    let user = state
        .auth_service
        .update_profile(user_id, payload.name.as_deref())
        .await?;
    Ok(Json(AuthResponse::new(user)))
}
