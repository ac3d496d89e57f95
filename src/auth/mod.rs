pub mod auth_dto;
pub mod auth_handlers;
pub mod auth_service;
pub mod cookie;
pub mod jwt;
pub mod password;

pub use auth_dto::{AuthResponse, LoginRequest, SignupRequest, UpdateProfileRequest, UsersResponse};
pub use auth_handlers::{list_users, login, logout, me, signup, update_profile};
pub use auth_service::{AuthService, Session};
pub use cookie::{removal_cookie, session_cookie, SESSION_COOKIE};
pub use jwt::{create_session_token, verify_jwt, Claims};
pub use password::{hash_password, verify_password};
