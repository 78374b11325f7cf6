use crate::errors::{AppError, AppResult};
use crate::policy::BAD_TOKEN_MESSAGE;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// In-process bearer token registry. Tokens do not survive a restart.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn open_session(&self, user_id: &str) -> AppResult<SessionHandle> {
        let expires_at = Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AppError::Internal("session lifetime is out of range".to_string()))?;
        let handle = SessionHandle {
            token: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            expires_at,
        };

        let mut sessions = self.sessions.lock().await;
        sessions.insert(handle.token.clone(), handle.clone());
        Ok(handle)
    }

    /// Returns the user id behind `token`, dropping the session if it has expired.
    pub async fn resolve(&self, token: &str) -> AppResult<String> {
        let mut sessions = self.sessions.lock().await;
        let Some(handle) = sessions.get(token) else {
            return Err(AppError::Unauthenticated(BAD_TOKEN_MESSAGE.to_string()));
        };
        if handle.expires_at <= Utc::now() {
            sessions.remove(token);
            return Err(AppError::Unauthenticated(BAD_TOKEN_MESSAGE.to_string()));
        }
        Ok(handle.user_id.clone())
    }

    pub async fn close_session(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(token).is_some()
    }

    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, handle| handle.expires_at > now);
        before - sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::SessionManager;
    use crate::errors::AppError;
    use chrono::Duration;

    #[tokio::test]
    async fn open_resolve_and_close() {
        let manager = SessionManager::new(Duration::hours(1));
        let handle = manager.open_session("u-1").await.expect("open");
        assert_eq!(manager.resolve(&handle.token).await.expect("resolve"), "u-1");
        assert!(manager.close_session(&handle.token).await);
        assert!(manager.resolve(&handle.token).await.is_err());
        assert!(!manager.close_session(&handle.token).await);
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected_and_purged() {
        let manager = SessionManager::new(Duration::seconds(-1));
        let stale = manager.open_session("u-1").await.expect("open stale");
        assert!(manager.resolve(&stale.token).await.is_err());

        manager.open_session("u-2").await.expect("open second");
        assert_eq!(manager.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn lifetime_past_the_calendar_is_an_error() {
        let manager = SessionManager::new(Duration::hours(3_000_000_000));
        let result = manager.open_session("u-1").await;
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(manager.purge_expired().await, 0);
    }
}
