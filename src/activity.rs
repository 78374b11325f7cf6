use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{ActivityAction, ActivityRecord};
use std::sync::Arc;

/// Appends immutable activity log entries. Nothing here updates or deletes them.
#[derive(Debug, Clone)]
pub struct ActivityRecorder {
    db: Arc<Database>,
}

impl ActivityRecorder {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn record(
        &self,
        action: ActivityAction,
        description: &str,
        actor_id: &str,
        project_id: Option<&str>,
        task_id: Option<&str>,
    ) -> AppResult<ActivityRecord> {
        if description.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Activity '{}' requires a description",
                action.as_str()
            )));
        }
        if actor_id.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Activity '{}' requires an actor",
                action.as_str()
            )));
        }

        let entry = self
            .db
            .insert_activity(action, description, actor_id, project_id, task_id)?;
        tracing::debug!(activity_id = %entry.id, action = action.as_str(), "activity recorded");
        Ok(entry)
    }

    pub fn recent(&self, project_id: Option<&str>, limit: i64) -> AppResult<Vec<ActivityRecord>> {
        self.db.list_activities(project_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::ActivityRecorder;
    use crate::db::Database;
    use crate::errors::AppError;
    use crate::models::ActivityAction;
    use std::sync::Arc;

    #[test]
    fn rejects_blank_description_without_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));
        let recorder = ActivityRecorder::new(db.clone());

        let result = recorder.record(ActivityAction::TaskUpdated, "  ", "u-1", None, None);
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(db.list_activities(None, 50).expect("list").is_empty());

        let entry = recorder
            .record(ActivityAction::TaskUpdated, "Task \"x\" was updated", "u-1", Some("p-1"), Some("t-1"))
            .expect("record");
        assert_eq!(entry.action, ActivityAction::TaskUpdated);
        assert_eq!(recorder.recent(Some("p-1"), 50).expect("recent").len(), 1);
    }
}
