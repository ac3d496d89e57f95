pub mod auth;
pub mod rate_limit;

pub use auth::{auth_middleware, session_token, AuthUser};
pub use rate_limit::{
    rate_limit_middleware, IpRateLimiter, API_LIMIT_MESSAGE, AUTH_LIMIT_MESSAGE,
};
