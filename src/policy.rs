use crate::errors::{AppError, AppResult};
use crate::models::{Role, UserRecord};

pub const NO_TOKEN_MESSAGE: &str = "Not authorized, no token";
pub const BAD_TOKEN_MESSAGE: &str = "Not authorized, token failed";
pub const ADMIN_REQUIRED_MESSAGE: &str = "Access denied. Admin privileges required.";

/// The authenticated identity performing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is(&self, user_id: &str) -> bool {
        self.id == user_id
    }
}

impl From<&UserRecord> for Actor {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

/// Pure predicates run before any entity write. They never touch the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGuard;

impl AccessGuard {
    pub fn new() -> Self {
        Self
    }

    /// Extracts the token from an `Authorization: Bearer <token>` header value.
    pub fn bearer_token<'a>(&self, authorization: Option<&'a str>) -> AppResult<&'a str> {
        let Some(raw) = authorization.map(str::trim).filter(|value| !value.is_empty()) else {
            return Err(AppError::Unauthenticated(NO_TOKEN_MESSAGE.to_string()));
        };
        let Some((scheme, token)) = raw.split_once(' ') else {
            return Err(AppError::Unauthenticated(NO_TOKEN_MESSAGE.to_string()));
        };
        let token = token.trim();
        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
            return Err(AppError::Unauthenticated(NO_TOKEN_MESSAGE.to_string()));
        }
        Ok(token)
    }

    /// Project update and delete are reserved for admins.
    pub fn require_admin(&self, actor: &Actor, operation: &str) -> AppResult<()> {
        if actor.is_admin() {
            return Ok(());
        }
        tracing::warn!(actor_id = %actor.id, operation, "admin-only operation denied");
        Err(AppError::Forbidden(ADMIN_REQUIRED_MESSAGE.to_string()))
    }
}
