use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth,
    middleware::{auth_middleware, rate_limit_middleware},
    notification, task,
    state::AppState,
    websocket::ws_handler,
};

pub fn create_router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config.frontend_url)?;

    // Credential endpoints get the strict budget
    let credential_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route_layer(middleware::from_fn_with_state(
            state.auth_limiter.clone(),
            rate_limit_middleware,
        ));

    let session_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/users", get(auth::list_users))
        .route("/profile", patch(auth::update_profile))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .route("/logout", post(auth::logout))
        .route_layer(middleware::from_fn_with_state(
            state.api_limiter.clone(),
            rate_limit_middleware,
        ));

    let auth_routes = credential_routes.merge(session_routes);

    // Protected routes (auth required)
    let task_routes = Router::new()
        .route("/", post(task::create_task))
        .route("/me", get(task::get_my_tasks))
        .route(
            "/:id",
            patch(task::update_task).delete(task::delete_task),
        );

    let notification_routes = Router::new()
        .route("/", get(notification::get_notifications))
        .route("/unread-count", get(notification::get_unread_count))
        .route("/read-all", patch(notification::mark_all_notifications_read))
        .route("/:id/read", patch(notification::mark_notification_read));

    let protected_routes = Router::new()
        .nest("/tasks", task_routes)
        .nest("/notifications", notification_routes)
        .route("/ws", get(ws_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.api_limiter.clone(),
            rate_limit_middleware,
        ));

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .merge(protected_routes);

    Ok(Router::new()
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Only the configured frontend may call the API with credentials.
fn cors_layer(frontend_url: &str) -> anyhow::Result<CorsLayer> {
    let origin = HeaderValue::from_str(frontend_url)
        .with_context(|| format!("FRONTEND_URL is not a valid origin: {}", frontend_url))?;

    tracing::info!("CORS configured for {}", frontend_url);

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .expose_headers([header::SET_COOKIE]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_rejects_invalid_origin() {
        assert!(cors_layer("http://localhost:5173").is_ok());
        assert!(cors_layer("http://bad\norigin").is_err());
    }
}
