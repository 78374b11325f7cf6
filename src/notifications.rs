use crate::db::{Database, NewNotification};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ListNotificationsFilters, MessageResponse, NotificationRecord, NotificationView, UnreadCountResponse,
};
use crate::policy::Actor;
use crate::tracker::TrackerCore;
use std::sync::Arc;

pub const RECENT_NOTIFICATIONS_LIMIT: i64 = 50;

/// Creates and manages notification records. Self-notification filtering is the
/// caller's job; every read or mutation here is scoped to one recipient.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    db: Arc<Database>,
}

impl NotificationDispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn dispatch(&self, notification: NewNotification) -> AppResult<NotificationRecord> {
        let mut created = self.db.insert_notifications(std::slice::from_ref(&notification))?;
        created
            .pop()
            .ok_or_else(|| AppError::Internal("notification insert returned no record".to_string()))
    }

    pub fn dispatch_batch(&self, batch: Vec<NewNotification>) -> AppResult<Vec<NotificationRecord>> {
        self.db.insert_notifications(&batch)
    }

    pub fn list_for(&self, recipient_id: &str, unread_only: bool) -> AppResult<Vec<NotificationRecord>> {
        self.db
            .list_notifications(recipient_id, unread_only, RECENT_NOTIFICATIONS_LIMIT)
    }

    pub fn unread_count(&self, recipient_id: &str) -> AppResult<i64> {
        self.db.count_unread_notifications(recipient_id)
    }

    pub fn mark_read(&self, notification_id: &str, recipient_id: &str) -> AppResult<NotificationRecord> {
        self.db
            .mark_notification_read(notification_id, recipient_id)?
            .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))
    }

    pub fn mark_all_read(&self, recipient_id: &str) -> AppResult<usize> {
        self.db.mark_all_notifications_read(recipient_id)
    }

    pub fn delete(&self, notification_id: &str, recipient_id: &str) -> AppResult<()> {
        if self.db.delete_notification(notification_id, recipient_id)? {
            Ok(())
        } else {
            Err(AppError::NotFound("Notification not found".to_string()))
        }
    }
}

impl TrackerCore {
    pub fn list_notifications(
        &self,
        actor: &Actor,
        filters: &ListNotificationsFilters,
    ) -> AppResult<Vec<NotificationView>> {
        let records = self
            .notifications
            .list_for(&actor.id, filters.unread.unwrap_or(false))?;
        self.expand_notifications(records)
    }

    pub fn unread_notification_count(&self, actor: &Actor) -> AppResult<UnreadCountResponse> {
        Ok(UnreadCountResponse {
            count: self.notifications.unread_count(&actor.id)?,
        })
    }

    pub fn mark_notification_read(&self, actor: &Actor, notification_id: &str) -> AppResult<NotificationView> {
        let record = self.notifications.mark_read(notification_id, &actor.id)?;
        let mut expanded = self.expand_notifications(vec![record])?;
        expanded
            .pop()
            .ok_or_else(|| AppError::Internal("notification expansion lost its record".to_string()))
    }

    pub fn mark_all_notifications_read(&self, actor: &Actor) -> AppResult<MessageResponse> {
        let updated = self.notifications.mark_all_read(&actor.id)?;
        tracing::info!(actor_id = %actor.id, updated, "notifications marked read");
        Ok(MessageResponse::new("All notifications marked as read"))
    }

    pub fn delete_notification(&self, actor: &Actor, notification_id: &str) -> AppResult<MessageResponse> {
        self.notifications.delete(notification_id, &actor.id)?;
        Ok(MessageResponse::new("Notification removed"))
    }
}
