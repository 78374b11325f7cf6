use crate::errors::{AppError, AppResult};
use crate::models::{
    AuthResponse, ChangePasswordPayload, LoginPayload, MessageResponse, RegisterPayload, UpdateProfilePayload,
    UserProfile, UserRecord, UserSummary,
};
use crate::policy::{Actor, BAD_TOKEN_MESSAGE};
use crate::projects::required_text;
use crate::tracker::TrackerCore;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

const MIN_PASSWORD_LENGTH: usize = 6;
const INVALID_CREDENTIALS: &str = "Invalid email or password";

impl TrackerCore {
    pub async fn register(&self, payload: RegisterPayload) -> AppResult<AuthResponse> {
        let name = required_text(payload.name.as_deref());
        let email = required_text(payload.email.as_deref());
        let password = payload.password.as_deref().filter(|value| !value.is_empty());
        let (Some(name), Some(email), Some(password)) = (name, email, password) else {
            return Err(AppError::Validation("Please provide all fields".to_string()));
        };
        let email = normalize_email(email)?;
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        if self.db.find_user_by_email(&email)?.is_some() {
            return Err(AppError::Conflict("User already exists".to_string()));
        }

        let hash = self.hash_off_runtime(password).await?;
        let user = self.db.register_user(name, &email, &hash)?;
        let session = self.sessions.open_session(&user.id).await?;

        tracing::info!(user_id = %user.id, role = user.role.as_str(), "user registered");
        Ok(auth_response(&user, session.token))
    }

    pub async fn login(&self, payload: LoginPayload) -> AppResult<AuthResponse> {
        let email = required_text(payload.email.as_deref());
        let password = payload.password.as_deref().filter(|value| !value.is_empty());
        let (Some(email), Some(password)) = (email, password) else {
            return Err(AppError::Validation("Please provide email and password".to_string()));
        };

        let Some(user) = self.db.find_user_by_email(email)? else {
            return Err(AppError::Unauthenticated(INVALID_CREDENTIALS.to_string()));
        };
        if !self.verify_off_runtime(password, &user.password_hash).await? {
            tracing::warn!(user_id = %user.id, "login rejected");
            return Err(AppError::Unauthenticated(INVALID_CREDENTIALS.to_string()));
        }

        let session = self.sessions.open_session(&user.id).await?;
        tracing::info!(user_id = %user.id, "user logged in");
        Ok(auth_response(&user, session.token))
    }

    pub async fn logout(&self, token: &str) -> MessageResponse {
        self.sessions.close_session(token).await;
        MessageResponse::new("Logged out")
    }

    /// Resolves an `Authorization` header value into the acting user, re-reading the role from the store.
    pub async fn resolve_actor(&self, authorization: Option<&str>) -> AppResult<Actor> {
        let token = self.guard.bearer_token(authorization)?;
        let user_id = self.sessions.resolve(token).await?;
        let user = self
            .db
            .get_user(&user_id)?
            .ok_or_else(|| AppError::Unauthenticated(BAD_TOKEN_MESSAGE.to_string()))?;
        Ok(Actor::from(&user))
    }

    pub fn current_user(&self, actor: &Actor) -> AppResult<UserProfile> {
        self.db
            .get_user(&actor.id)?
            .map(|user| user.profile())
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub fn list_users(&self) -> AppResult<Vec<UserSummary>> {
        Ok(self.db.list_users()?.iter().map(UserRecord::summary).collect())
    }

    pub fn update_profile(&self, actor: &Actor, payload: UpdateProfilePayload) -> AppResult<UserProfile> {
        let current = self
            .db
            .get_user(&actor.id)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let name = match payload.name {
            Some(name) => required_text(Some(&name))
                .ok_or_else(|| AppError::Validation("Name cannot be empty".to_string()))?
                .to_string(),
            None => current.name.clone(),
        };
        let email = match payload.email {
            Some(email) => normalize_email(&email)?,
            None => current.email.clone(),
        };
        if !email.eq_ignore_ascii_case(&current.email) {
            if let Some(other) = self.db.find_user_by_email(&email)? {
                if other.id != current.id {
                    return Err(AppError::Conflict("Email already in use".to_string()));
                }
            }
        }

        let updated = self
            .db
            .update_user_profile(&actor.id, &name, &email)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        tracing::info!(user_id = %updated.id, "profile updated");
        Ok(updated.profile())
    }

    pub fn change_password(&self, actor: &Actor, payload: ChangePasswordPayload) -> AppResult<MessageResponse> {
        let current_password = payload.current_password.as_deref().filter(|value| !value.is_empty());
        let new_password = payload.new_password.as_deref().filter(|value| !value.is_empty());
        let (Some(current_password), Some(new_password)) = (current_password, new_password) else {
            return Err(AppError::Validation("Please provide current and new password".to_string()));
        };
        if new_password.len() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let user = self
            .db
            .get_user(&actor.id)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        if !verify_password(&self.hasher, current_password, &user.password_hash) {
            return Err(AppError::Unauthenticated("Current password is incorrect".to_string()));
        }

        let hash = hash_password(&self.hasher, new_password)?;
        self.db.update_user_password(&user.id, &hash)?;
        tracing::info!(user_id = %user.id, "password changed");
        Ok(MessageResponse::new("Password updated successfully"))
    }

    /// Argon2 work runs on the blocking pool.
    async fn hash_off_runtime(&self, password: &str) -> AppResult<String> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        match tokio::task::spawn_blocking(move || hash_password(&hasher, &password)).await {
            Ok(result) => result,
            Err(error) => Err(AppError::Internal(format!("password hashing task failed: {}", error))),
        }
    }

    async fn verify_off_runtime(&self, password: &str, stored_hash: &str) -> AppResult<bool> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let stored_hash = stored_hash.to_string();
        match tokio::task::spawn_blocking(move || verify_password(&hasher, &password, &stored_hash)).await {
            Ok(matched) => Ok(matched),
            Err(error) => Err(AppError::Internal(format!("password check task failed: {}", error))),
        }
    }
}

fn hash_password(hasher: &Argon2<'_>, password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)?;
    let hash = hasher.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// A stored hash that fails to parse counts as a mismatch.
fn verify_password(hasher: &Argon2<'_>, password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    hasher.verify_password(password.as_bytes(), &parsed).is_ok()
}

fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    if !EMAIL_RE.is_match(&email) {
        return Err(AppError::Validation("Please provide a valid email".to_string()));
    }
    Ok(email)
}

fn auth_response(user: &UserRecord, token: String) -> AuthResponse {
    AuthResponse {
        id: user.id.clone(),
        name: user.name.clone(),
        email: user.email.clone(),
        role: user.role,
        token,
    }
}
