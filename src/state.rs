use anyhow::Context;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    auth::AuthService,
    db::DbPool,
    middleware::{IpRateLimiter, API_LIMIT_MESSAGE, AUTH_LIMIT_MESSAGE},
    notification::{NotificationRepository, NotificationService},
    task::{TaskRepository, TaskService},
    user::UserRepository,
    websocket::{EventBroadcaster, RoomRegistry},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: RoomRegistry,
    pub auth_service: AuthService,
    pub task_service: TaskService,
    pub notification_service: NotificationService,
    pub auth_limiter: Arc<IpRateLimiter>,
    pub api_limiter: Arc<IpRateLimiter>,
}

impl AppState {
    pub fn new(db: DbPool, config: Arc<Config>) -> Self {
        let rooms = RoomRegistry::new();
        let broadcaster = EventBroadcaster::new(rooms.clone());

        let user_repository = UserRepository::new(db.clone());
        let task_repository = TaskRepository::new(db.clone());
        let notification_repository = NotificationRepository::new(db.clone());

        let auth_service = AuthService::new(
            user_repository.clone(),
            config.jwt_secret.clone(),
            config.jwt_expiration_hours,
        );
        let notification_service = NotificationService::new(notification_repository);
        let task_service = TaskService::new(
            db,
            task_repository,
            user_repository,
            notification_service.clone(),
            broadcaster,
        );

        let auth_limiter = Arc::new(IpRateLimiter::new(
            &config.auth_rate_limit,
            AUTH_LIMIT_MESSAGE,
            config.trust_proxy_hops,
        ));
        let api_limiter = Arc::new(IpRateLimiter::new(
            &config.api_rate_limit,
            API_LIMIT_MESSAGE,
            config.trust_proxy_hops,
        ));

        Self {
            config,
            rooms,
            auth_service,
            task_service,
            notification_service,
            auth_limiter,
            api_limiter,
        }
    }
}

/// A request budget: at most `max` requests per `window` for one client.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimit {
    pub window: Duration,
    pub max: u32,
}

impl RateLimit {
    /// Seconds a rejected client should wait, as reported in `retryAfter`.
    pub fn retry_after_secs(&self) -> u64 {
        (self.window.as_millis() as f64 / 1000.0).round() as u64
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub frontend_url: String,
    pub production: bool,
    pub auth_rate_limit: RateLimit,
    pub api_rate_limit: RateLimit,
    /// Reverse proxies in front of the server; 0 ignores `X-Forwarded-For`.
    pub trust_proxy_hops: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).with_context(|| format!("{} must be set", key));

        let frontend_url = lookup("FRONTEND_URL")
            .unwrap_or_else(|| "http://localhost:5173".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS", "5")?,
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var(&lookup, "PORT", "3000")?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiration_hours: parse_var(&lookup, "JWT_EXPIRATION_HOURS", "24")?,
            frontend_url,
            production: lookup("APP_ENV").as_deref() == Some("production"),
            auth_rate_limit: RateLimit {
                window: Duration::from_millis(parse_var(&lookup, "RATE_LIMIT_AUTH_WINDOW_MS", "900000")?),
                max: parse_var(&lookup, "RATE_LIMIT_AUTH_MAX", "10")?,
            },
            api_rate_limit: RateLimit {
                window: Duration::from_millis(parse_var(&lookup, "RATE_LIMIT_API_WINDOW_MS", "900000")?),
                max: parse_var(&lookup, "RATE_LIMIT_API_MAX", "150")?,
            },
            trust_proxy_hops: parse_var(&lookup, "TRUST_PROXY_HOPS", "0")?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse `key` (or `default`) straight into its target type, so out-of-range
/// values are rejected rather than truncated.
fn parse_var<F, T>(lookup: &F, key: &str, default: &str) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse::<T>()
        .ok()
        .with_context(|| format!("{} must be a valid number, got {:?}", key, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/taskboard"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.jwt_expiration_hours, 24);
        assert_eq!(config.frontend_url, "http://localhost:5173");
        assert!(!config.production);
        assert_eq!(config.auth_rate_limit.max, 10);
        assert_eq!(config.api_rate_limit.max, 150);
        assert_eq!(config.api_rate_limit.retry_after_secs(), 900);
    }

    #[test]
    fn test_frontend_url_trailing_slash_is_stripped() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/taskboard"),
            ("JWT_SECRET", "secret"),
            ("FRONTEND_URL", "https://app.example.com/"),
            ("APP_ENV", "production"),
        ]))
        .unwrap();

        assert_eq!(config.frontend_url, "https://app.example.com");
        assert!(config.production);
    }

    #[test]
    fn test_missing_secret_is_reported() {
        let err = Config::from_lookup(lookup_from(&[(
            "DATABASE_URL",
            "postgres://localhost/taskboard",
        )]))
        .unwrap_err();

        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_non_numeric_port_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/taskboard"),
            ("JWT_SECRET", "secret"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/taskboard"),
            ("JWT_SECRET", "secret"),
            ("PORT", "70000"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/taskboard"),
            ("JWT_SECRET", "secret"),
            ("RATE_LIMIT_API_MAX", "-1"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_API_MAX"));
    }

    #[test]
    fn test_trust_proxy_hops() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/taskboard"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.trust_proxy_hops, 0);

        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/taskboard"),
            ("JWT_SECRET", "secret"),
            ("TRUST_PROXY_HOPS", "1"),
        ]))
        .unwrap();
        assert_eq!(config.trust_proxy_hops, 1);
    }
}
