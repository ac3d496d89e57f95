use uuid::Uuid;

use crate::auth::{create_session_token, hash_password, verify_password};
use crate::error::{AppError, Result};
use crate::user::{User, UserDirectoryEntry, UserRepository};

/// A signed-in user together with the session token issued for them.
#[derive(Debug)]
pub struct Session {
    pub user: User,
    pub token: String,
}

#[derive(Clone)]
pub struct AuthService {
    user_repo: UserRepository,
    jwt_secret: String,
    jwt_expiration_hours: i64,
}

impl AuthService {
    pub fn new(user_repo: UserRepository, jwt_secret: String, jwt_expiration_hours: i64) -> Self {
        Self {
            user_repo,
            jwt_secret,
            jwt_expiration_hours,
        }
    }

    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<Session> {
        let name = required_name(Some(name))?;
        let password_hash = hash_password(password)?;

        let user = self
            .user_repo
            .create(name, email, &password_hash)
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    AppError::BadRequest("User already exists".to_string())
                } else {
                    e
                }
            })?;

        tracing::info!("User {} signed up", user.id);
        self.session_for(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let user = self
            .user_repo
            .find_by_email(email)
            .await?
            .ok_or_else(invalid_credentials)?;

        if !verify_password(password, &user.password_hash)? {
            return Err(invalid_credentials());
        }

        tracing::info!("User {} logged in", user.id);
        self.session_for(user)
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<User> {
        self.user_repo
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn directory(&self) -> Result<Vec<UserDirectoryEntry>> {
        self.user_repo.list_directory().await
    }

    pub async fn update_profile(&self, user_id: Uuid, name: Option<&str>) -> Result<User> {
        let name = required_name(name)?;

        self.user_repo
            .update_name(user_id, name)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    fn session_for(&self, user: User) -> Result<Session> {
        let token = create_session_token(
            user.id,
            &user.email,
            &self.jwt_secret,
            self.jwt_expiration_hours,
        )?;
        Ok(Session { user, token })
    }
}

fn invalid_credentials() -> AppError {
    AppError::Authentication("Invalid credentials".to_string())
}

fn required_name(name: Option<&str>) -> Result<&str> {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(AppError::BadRequest("Name is required".to_string())),
    }
}
