use crate::activity::ActivityRecorder;
use crate::config::AuthSettings;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    ActivityRecord, ActivityView, ListActivitiesFilters, ListTasksFilters, NotificationRecord, NotificationView,
    ProjectRecord, ProjectView, TaskRecord, TaskView,
};
use crate::notifications::NotificationDispatcher;
use crate::policy::AccessGuard;
use crate::session::SessionManager;
use argon2::{Algorithm, Argon2, Params, Version};
use std::sync::Arc;

pub const RECENT_ACTIVITY_LIMIT: i64 = 50;

/// Owns the store and every collaborator the mutation orchestrators need.
/// Project, task and auth operations live in their own modules as `impl TrackerCore` blocks.
pub struct TrackerCore {
    pub(crate) db: Arc<Database>,
    pub(crate) guard: AccessGuard,
    pub(crate) activity: ActivityRecorder,
    pub(crate) notifications: NotificationDispatcher,
    pub(crate) sessions: SessionManager,
    pub(crate) hasher: Argon2<'static>,
}

impl TrackerCore {
    pub fn new(db: Arc<Database>, auth: &AuthSettings) -> AppResult<Self> {
        let params = Params::new(auth.hash_memory_kib, auth.hash_iterations, 1, None)
            .map_err(|err| AppError::Internal(format!("invalid password hashing parameters: {}", err)))?;

        Ok(Self {
            guard: AccessGuard::new(),
            activity: ActivityRecorder::new(db.clone()),
            notifications: NotificationDispatcher::new(db.clone()),
            sessions: SessionManager::new(auth.session_ttl),
            hasher: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            db,
        })
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn list_projects(&self) -> AppResult<Vec<ProjectView>> {
        let projects = self.db.list_projects()?;
        self.expand_projects(projects)
    }

    pub fn get_project(&self, project_id: &str) -> AppResult<ProjectView> {
        let project = self
            .db
            .get_project(project_id)?
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;
        self.expand_project(project)
    }

    pub fn list_tasks(&self, filters: &ListTasksFilters) -> AppResult<Vec<TaskView>> {
        let project = filters
            .project
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let tasks = self.db.list_tasks(project)?;
        self.expand_tasks(tasks)
    }

    pub fn get_task(&self, task_id: &str) -> AppResult<TaskView> {
        let task = self
            .db
            .get_task(task_id)?
            .ok_or_else(|| AppError::NotFound("Task not found".to_string()))?;
        self.expand_task(task)
    }

    /// The 50 most recent entries, newest first.
    pub fn list_activities(&self, filters: &ListActivitiesFilters) -> AppResult<Vec<ActivityView>> {
        let project = filters
            .project
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let entries = self.activity.recent(project, RECENT_ACTIVITY_LIMIT)?;
        self.expand_activities(entries)
    }

    pub(crate) fn expand_project(&self, project: ProjectRecord) -> AppResult<ProjectView> {
        let mut expanded = self.expand_projects(vec![project])?;
        expanded
            .pop()
            .ok_or_else(|| AppError::Internal("project expansion lost its record".to_string()))
    }

    pub(crate) fn expand_projects(&self, projects: Vec<ProjectRecord>) -> AppResult<Vec<ProjectView>> {
        let user_ids: Vec<&str> = projects
            .iter()
            .flat_map(|project| {
                std::iter::once(project.created_by.as_str()).chain(project.members.iter().map(String::as_str))
            })
            .collect();
        let users = self.db.user_summaries(&user_ids)?;

        Ok(projects
            .into_iter()
            .map(|project| ProjectView {
                created_by: users.get(&project.created_by).cloned(),
                members: project
                    .members
                    .iter()
                    .filter_map(|member| users.get(member).cloned())
                    .collect(),
                id: project.id,
                title: project.title,
                description: project.description,
                deadline: project.deadline,
                status: project.status,
                created_at: project.created_at,
                updated_at: project.updated_at,
            })
            .collect())
    }

    pub(crate) fn expand_task(&self, task: TaskRecord) -> AppResult<TaskView> {
        let mut expanded = self.expand_tasks(vec![task])?;
        expanded
            .pop()
            .ok_or_else(|| AppError::Internal("task expansion lost its record".to_string()))
    }

    pub(crate) fn expand_tasks(&self, tasks: Vec<TaskRecord>) -> AppResult<Vec<TaskView>> {
        let user_ids: Vec<&str> = tasks
            .iter()
            .flat_map(|task| std::iter::once(task.created_by.as_str()).chain(task.assigned_to.as_deref()))
            .collect();
        let project_ids: Vec<&str> = tasks.iter().map(|task| task.project_id.as_str()).collect();
        let users = self.db.user_summaries(&user_ids)?;
        let projects = self.db.project_summaries(&project_ids)?;

        Ok(tasks
            .into_iter()
            .map(|task| TaskView {
                assigned_to: task.assigned_to.as_ref().and_then(|id| users.get(id).cloned()),
                project: projects.get(&task.project_id).cloned(),
                created_by: users.get(&task.created_by).cloned(),
                id: task.id,
                title: task.title,
                description: task.description,
                priority: task.priority,
                status: task.status,
                due_date: task.due_date,
                created_at: task.created_at,
                updated_at: task.updated_at,
            })
            .collect())
    }

    pub(crate) fn expand_activities(&self, entries: Vec<ActivityRecord>) -> AppResult<Vec<ActivityView>> {
        let user_ids: Vec<&str> = entries.iter().map(|entry| entry.user_id.as_str()).collect();
        let project_ids: Vec<&str> = entries.iter().filter_map(|entry| entry.project_id.as_deref()).collect();
        let task_ids: Vec<&str> = entries.iter().filter_map(|entry| entry.task_id.as_deref()).collect();
        let users = self.db.user_summaries(&user_ids)?;
        let projects = self.db.project_summaries(&project_ids)?;
        let tasks = self.db.task_summaries(&task_ids)?;

        Ok(entries
            .into_iter()
            .map(|entry| ActivityView {
                user: users.get(&entry.user_id).cloned(),
                project: entry.project_id.as_ref().and_then(|id| projects.get(id).cloned()),
                task: entry.task_id.as_ref().and_then(|id| tasks.get(id).cloned()),
                id: entry.id,
                action: entry.action,
                description: entry.description,
                created_at: entry.created_at,
            })
            .collect())
    }

    pub(crate) fn expand_notifications(
        &self,
        notifications: Vec<NotificationRecord>,
    ) -> AppResult<Vec<NotificationView>> {
        let user_ids: Vec<&str> = notifications
            .iter()
            .filter_map(|notification| notification.sender_id.as_deref())
            .collect();
        let project_ids: Vec<&str> = notifications
            .iter()
            .filter_map(|notification| notification.project_id.as_deref())
            .collect();
        let task_ids: Vec<&str> = notifications
            .iter()
            .filter_map(|notification| notification.task_id.as_deref())
            .collect();
        let users = self.db.user_summaries(&user_ids)?;
        let projects = self.db.project_summaries(&project_ids)?;
        let tasks = self.db.task_summaries(&task_ids)?;

        Ok(notifications
            .into_iter()
            .map(|notification| NotificationView {
                sender: notification.sender_id.as_ref().and_then(|id| users.get(id).cloned()),
                project: notification.project_id.as_ref().and_then(|id| projects.get(id).cloned()),
                task: notification.task_id.as_ref().and_then(|id| tasks.get(id).cloned()),
                id: notification.id,
                recipient: notification.recipient_id,
                kind: notification.kind,
                message: notification.message,
                link: notification.link,
                read: notification.read,
                created_at: notification.created_at,
            })
            .collect())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{core, user};
    use crate::db::NewNotification;
    use crate::errors::AppError;
    use crate::models::{ActivityAction, ListActivitiesFilters, NotificationType};

    #[test]
    fn missing_entities_surface_not_found() {
        let (_dir, core) = core();
        assert!(matches!(core.get_project("nope"), Err(AppError::NotFound(_))));
        assert!(matches!(core.get_task("nope"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn activity_listing_caps_at_fifty_and_expands_actor() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        for index in 0..60 {
            core.activity
                .record(ActivityAction::TaskUpdated, &format!("edit {}", index), &admin.id, None, None)
                .expect("record");
        }

        let listed = core.list_activities(&ListActivitiesFilters::default()).expect("list");
        assert_eq!(listed.len(), 50);
        assert_eq!(listed[0].description, "edit 59");
        assert_eq!(listed[49].description, "edit 10");
        assert_eq!(listed[0].user.as_ref().map(|u| u.name.as_str()), Some("Ada"));
        assert!(listed[0].project.is_none());
    }

    #[test]
    fn notification_expansion_resolves_sender() {
        let (_dir, core) = core();
        let sender = user(&core, "Ada");
        let recipient = user(&core, "Bob");
        let created = core
            .notifications
            .dispatch(NewNotification {
                recipient_id: recipient.id.clone(),
                sender_id: Some(sender.id.clone()),
                kind: NotificationType::Mention,
                message: "hi".to_string(),
                link: None,
                project_id: Some("gone".to_string()),
                task_id: None,
            })
            .expect("dispatch");

        let views = core.expand_notifications(vec![created]).expect("expand");
        assert_eq!(views[0].sender.as_ref().map(|s| s.email.as_str()), Some("ada@example.com"));
        assert!(views[0].project.is_none());
        assert_eq!(views[0].recipient, recipient.id);
    }
}
