use crate::db::{NewNotification, NewTask};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ActivityAction, CreateTaskPayload, MessageResponse, NotificationType, TaskRecord, TaskStatus, TaskView,
    UpdateTaskPayload,
};
use crate::policy::Actor;
use crate::projects::required_text;
use crate::tracker::TrackerCore;

/// What a task update is logged as. At most one cause is recorded per edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskChange {
    Status { from: TaskStatus, to: TaskStatus },
    Assignee { to: Option<String> },
    FieldEdit,
    /// `status` or `assignedTo` was resubmitted with its current value; nothing is logged.
    Unchanged,
}

impl TaskChange {
    /// Precedence: status change, then assignee change, then a payload carrying
    /// neither key. Anything else is the silent unchanged case.
    pub fn classify(before: &TaskRecord, changes: &UpdateTaskPayload) -> Self {
        if let Some(status) = changes.status {
            if status != before.status {
                return Self::Status {
                    from: before.status,
                    to: status,
                };
            }
        }
        if let Some(assignee) = &changes.assigned_to {
            if assignee != &before.assigned_to {
                return Self::Assignee { to: assignee.clone() };
            }
        }
        if changes.status.is_none() && changes.assigned_to.is_none() {
            return Self::FieldEdit;
        }
        Self::Unchanged
    }
}

impl TrackerCore {
    pub fn create_task(&self, actor: &Actor, payload: CreateTaskPayload) -> AppResult<TaskView> {
        let title = required_text(payload.title.as_deref());
        let description = required_text(payload.description.as_deref());
        let project_id = required_text(payload.project.as_deref());
        let (Some(title), Some(description), Some(due_date), Some(project_id)) =
            (title, description, payload.due_date, project_id)
        else {
            return Err(AppError::Validation("Please provide all required fields".to_string()));
        };
        let assigned_to = required_text(payload.assigned_to.as_deref());

        let task = self.db.insert_task(&NewTask {
            title,
            description,
            priority: payload.priority.unwrap_or_default(),
            status: payload.status.unwrap_or_default(),
            due_date,
            assigned_to,
            project_id,
            created_by: &actor.id,
        })?;

        self.activity.record(
            ActivityAction::TaskCreated,
            &format!("Task \"{}\" was created", task.title),
            &actor.id,
            Some(&task.project_id),
            Some(&task.id),
        )?;

        let mut notified = false;
        if let Some(assignee) = task.assigned_to.as_deref().filter(|assignee| !actor.is(assignee)) {
            self.notifications.dispatch(assignment_notice(actor, assignee, &task))?;
            notified = true;
        }

        tracing::info!(
            task_id = %task.id,
            project_id = %task.project_id,
            actor_id = %actor.id,
            notified,
            "task created"
        );
        self.expand_task(task)
    }

    pub fn update_task(&self, actor: &Actor, task_id: &str, payload: UpdateTaskPayload) -> AppResult<TaskView> {
        let before = self
            .db
            .get_task(task_id)?
            .ok_or_else(|| AppError::NotFound("Task not found".to_string()))?;

        let changes = normalize_task_changes(payload)?;
        let updated = self
            .db
            .update_task(task_id, &changes)?
            .ok_or_else(|| AppError::NotFound("Task not found".to_string()))?;

        let change = TaskChange::classify(&before, &changes);
        match &change {
            TaskChange::Status { from, to } => {
                let action = if *to == TaskStatus::Done {
                    ActivityAction::TaskCompleted
                } else {
                    ActivityAction::TaskMoved
                };
                self.activity.record(
                    action,
                    &format!(
                        "Task \"{}\" moved from \"{}\" to \"{}\"",
                        updated.title,
                        from.as_str(),
                        to.as_str()
                    ),
                    &actor.id,
                    Some(&updated.project_id),
                    Some(&updated.id),
                )?;
            }
            TaskChange::Assignee { to } => {
                // A cleared assignee is still an assignment change; there is just nobody to notify.
                let assignee_name = match to {
                    Some(assignee) => self
                        .db
                        .user_summaries(&[assignee.as_str()])?
                        .remove(assignee)
                        .map(|summary| summary.name)
                        .unwrap_or_else(|| "a user".to_string()),
                    None => "no one".to_string(),
                };
                self.activity.record(
                    ActivityAction::UserAssigned,
                    &format!("Task \"{}\" was assigned to {}", updated.title, assignee_name),
                    &actor.id,
                    Some(&updated.project_id),
                    Some(&updated.id),
                )?;
                if let Some(assignee) = to.as_deref().filter(|assignee| !actor.is(assignee)) {
                    self.notifications
                        .dispatch(assignment_notice(actor, assignee, &updated))?;
                }
            }
            TaskChange::FieldEdit => {
                self.activity.record(
                    ActivityAction::TaskUpdated,
                    &format!("Task \"{}\" was updated", updated.title),
                    &actor.id,
                    Some(&updated.project_id),
                    Some(&updated.id),
                )?;
            }
            TaskChange::Unchanged => {
                tracing::debug!(task_id = %updated.id, "task update resubmitted current values; no activity logged");
            }
        }

        tracing::info!(task_id = %updated.id, actor_id = %actor.id, change = ?change, "task updated");
        self.expand_task(updated)
    }

    /// Logs against the task's project, then hard-deletes the task.
    pub fn delete_task(&self, actor: &Actor, task_id: &str) -> AppResult<MessageResponse> {
        let existing = self
            .db
            .get_task(task_id)?
            .ok_or_else(|| AppError::NotFound("Task not found".to_string()))?;

        self.activity.record(
            ActivityAction::TaskDeleted,
            &format!("Task \"{}\" was deleted", existing.title),
            &actor.id,
            Some(&existing.project_id),
            None,
        )?;
        self.db.delete_task(task_id)?;

        tracing::info!(task_id = %task_id, actor_id = %actor.id, "task deleted");
        Ok(MessageResponse::new("Task removed"))
    }
}

fn assignment_notice(actor: &Actor, assignee: &str, task: &TaskRecord) -> NewNotification {
    NewNotification {
        recipient_id: assignee.to_string(),
        sender_id: Some(actor.id.clone()),
        kind: NotificationType::TaskAssigned,
        message: format!("You have been assigned to task \"{}\"", task.title),
        link: Some(format!("/projects/{}/tasks", task.project_id)),
        project_id: Some(task.project_id.clone()),
        task_id: Some(task.id.clone()),
    }
}

fn normalize_task_changes(payload: UpdateTaskPayload) -> AppResult<UpdateTaskPayload> {
    let title = match payload.title {
        Some(title) => Some(
            required_text(Some(&title))
                .ok_or_else(|| AppError::Validation("Please add a task title".to_string()))?
                .to_string(),
        ),
        None => None,
    };
    let description = match payload.description {
        Some(description) => Some(
            required_text(Some(&description))
                .ok_or_else(|| AppError::Validation("Please add a task description".to_string()))?
                .to_string(),
        ),
        None => None,
    };
    // An empty id means "nobody", same as an explicit null.
    let assigned_to = payload
        .assigned_to
        .map(|assignee| required_text(assignee.as_deref()).map(ToString::to_string));

    Ok(UpdateTaskPayload {
        title,
        description,
        priority: payload.priority,
        status: payload.status,
        due_date: payload.due_date,
        assigned_to,
    })
}

#[cfg(test)]
mod tests {
    use super::TaskChange;
    use crate::errors::AppError;
    use crate::models::{
        ActivityAction, CreateProjectPayload, CreateTaskPayload, ListActivitiesFilters, NotificationType,
        TaskPriority, TaskStatus, TaskView, UpdateTaskPayload,
    };
    use crate::policy::Actor;
    use crate::tracker::test_support::{core, user};
    use crate::tracker::TrackerCore;
    use chrono::NaiveDate;

    fn project(core: &TrackerCore, actor: &Actor) -> String {
        core.create_project(
            actor,
            CreateProjectPayload {
                title: Some("Board".to_string()),
                description: Some("work".to_string()),
                deadline: NaiveDate::from_ymd_opt(2025, 12, 31),
                members: None,
            },
        )
        .expect("project")
        .id
    }

    fn task(core: &TrackerCore, actor: &Actor, project_id: &str, assigned_to: Option<&str>) -> TaskView {
        core.create_task(
            actor,
            CreateTaskPayload {
                title: Some("Write docs".to_string()),
                description: Some("all of them".to_string()),
                due_date: NaiveDate::from_ymd_opt(2025, 11, 1),
                project: Some(project_id.to_string()),
                assigned_to: assigned_to.map(ToString::to_string),
                ..CreateTaskPayload::default()
            },
        )
        .expect("task")
    }

    fn actions(core: &TrackerCore) -> Vec<ActivityAction> {
        core.list_activities(&ListActivitiesFilters::default())
            .expect("log")
            .into_iter()
            .map(|entry| entry.action)
            .collect()
    }

    #[test]
    fn create_applies_defaults_and_notifies_other_assignee() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let bob = user(&core, "Bob");
        let project_id = project(&core, &admin);

        let created = task(&core, &admin, &project_id, Some(&bob.id));
        assert_eq!(created.priority, TaskPriority::Medium);
        assert_eq!(created.status, TaskStatus::ToDo);
        assert_eq!(created.assigned_to.as_ref().map(|u| u.name.as_str()), Some("Bob"));
        assert_eq!(created.project.as_ref().map(|p| p.title.as_str()), Some("Board"));

        let notices = core.notifications.list_for(&bob.id, false).expect("bob");
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NotificationType::TaskAssigned);
        assert_eq!(notices[0].task_id.as_deref(), Some(created.id.as_str()));
        assert_eq!(actions(&core)[0], ActivityAction::TaskCreated);

        task(&core, &admin, &project_id, Some(&admin.id));
        assert!(core.notifications.list_for(&admin.id, false).expect("admin").is_empty());
    }

    #[test]
    fn create_requires_project_and_due_date() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let result = core.create_task(
            &admin,
            CreateTaskPayload {
                title: Some("t".to_string()),
                description: Some("d".to_string()),
                due_date: NaiveDate::from_ymd_opt(2025, 1, 1),
                ..CreateTaskPayload::default()
            },
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(actions(&core).is_empty());
    }

    #[test]
    fn status_change_to_done_completes_and_other_moves() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let project_id = project(&core, &admin);
        let first = task(&core, &admin, &project_id, None);
        let second = task(&core, &admin, &project_id, None);

        core.update_task(
            &admin,
            &first.id,
            UpdateTaskPayload {
                status: Some(TaskStatus::Done),
                ..UpdateTaskPayload::default()
            },
        )
        .expect("complete");
        assert_eq!(actions(&core)[0], ActivityAction::TaskCompleted);

        core.update_task(
            &admin,
            &second.id,
            UpdateTaskPayload {
                status: Some(TaskStatus::InProgress),
                ..UpdateTaskPayload::default()
            },
        )
        .expect("move");
        let log = core.list_activities(&ListActivitiesFilters::default()).expect("log");
        assert_eq!(log[0].action, ActivityAction::TaskMoved);
        assert_eq!(log[0].description, "Task \"Write docs\" moved from \"To Do\" to \"In Progress\"");
    }

    #[test]
    fn reassignment_logs_and_notifies_new_assignee_once() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let bob = user(&core, "Bob");
        let project_id = project(&core, &admin);
        let created = task(&core, &admin, &project_id, None);
        let before = actions(&core).len();

        let updated = core
            .update_task(
                &admin,
                &created.id,
                UpdateTaskPayload {
                    assigned_to: Some(Some(bob.id.clone())),
                    ..UpdateTaskPayload::default()
                },
            )
            .expect("assign");
        assert_eq!(updated.assigned_to.as_ref().map(|u| u.id.as_str()), Some(bob.id.as_str()));

        let log = actions(&core);
        assert_eq!(log.len(), before + 1);
        assert_eq!(log[0], ActivityAction::UserAssigned);
        assert_eq!(core.notifications.list_for(&bob.id, false).expect("bob").len(), 1);
    }

    #[test]
    fn self_assignment_logs_without_notification() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let project_id = project(&core, &admin);
        let created = task(&core, &admin, &project_id, None);

        core.update_task(
            &admin,
            &created.id,
            UpdateTaskPayload {
                assigned_to: Some(Some(admin.id.clone())),
                ..UpdateTaskPayload::default()
            },
        )
        .expect("assign self");
        assert_eq!(actions(&core)[0], ActivityAction::UserAssigned);
        assert!(core.notifications.list_for(&admin.id, false).expect("admin").is_empty());
    }

    #[test]
    fn pure_field_edit_logs_task_updated() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let project_id = project(&core, &admin);
        let created = task(&core, &admin, &project_id, None);

        let updated = core
            .update_task(
                &admin,
                &created.id,
                UpdateTaskPayload {
                    title: Some("Write more docs".to_string()),
                    priority: Some(TaskPriority::High),
                    ..UpdateTaskPayload::default()
                },
            )
            .expect("edit");
        assert_eq!(updated.title, "Write more docs");
        let log = core.list_activities(&ListActivitiesFilters::default()).expect("log");
        assert_eq!(log[0].action, ActivityAction::TaskUpdated);
        assert_eq!(log[0].description, "Task \"Write more docs\" was updated");
    }

    #[test]
    fn resubmitting_current_status_logs_nothing() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let project_id = project(&core, &admin);
        let created = task(&core, &admin, &project_id, None);
        let before = actions(&core).len();

        core.update_task(
            &admin,
            &created.id,
            UpdateTaskPayload {
                status: Some(TaskStatus::ToDo),
                title: Some("Renamed".to_string()),
                ..UpdateTaskPayload::default()
            },
        )
        .expect("resubmit");
        assert_eq!(actions(&core).len(), before);
        assert_eq!(core.get_task(&created.id).expect("get").title, "Renamed");
    }

    #[test]
    fn status_change_wins_over_reassignment() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let bob = user(&core, "Bob");
        let project_id = project(&core, &admin);
        let created = task(&core, &admin, &project_id, None);
        let before = actions(&core).len();

        core.update_task(
            &admin,
            &created.id,
            UpdateTaskPayload {
                status: Some(TaskStatus::InProgress),
                assigned_to: Some(Some(bob.id.clone())),
                ..UpdateTaskPayload::default()
            },
        )
        .expect("update");
        let log = actions(&core);
        assert_eq!(log.len(), before + 1);
        assert_eq!(log[0], ActivityAction::TaskMoved);
        assert!(core.notifications.list_for(&bob.id, false).expect("bob").is_empty());
    }

    #[test]
    fn clearing_assignee_logs_assignment_without_notice() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let bob = user(&core, "Bob");
        let project_id = project(&core, &admin);
        let created = task(&core, &admin, &project_id, Some(&bob.id));
        let before = actions(&core).len();

        let payload: UpdateTaskPayload = serde_json::from_str(r#"{"assignedTo":null}"#).expect("payload");
        let updated = core.update_task(&admin, &created.id, payload).expect("clear");
        assert!(updated.assigned_to.is_none());

        let log = core.list_activities(&ListActivitiesFilters::default()).expect("log");
        assert_eq!(log.len(), before + 1);
        assert_eq!(log[0].action, ActivityAction::UserAssigned);
        assert_eq!(log[0].description, "Task \"Write docs\" was assigned to no one");
        assert_eq!(core.notifications.list_for(&bob.id, false).expect("bob").len(), 1);
        assert!(core.notifications.list_for(&admin.id, false).expect("admin").is_empty());
    }

    #[test]
    fn delete_logs_against_project_and_missing_is_not_found() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let project_id = project(&core, &admin);
        let created = task(&core, &admin, &project_id, None);

        let response = core.delete_task(&admin, &created.id).expect("delete");
        assert_eq!(response.message, "Task removed");
        let log = core
            .list_activities(&ListActivitiesFilters {
                project: Some(project_id.clone()),
            })
            .expect("log");
        assert_eq!(log[0].action, ActivityAction::TaskDeleted);
        assert!(log[0].task.is_none());
        assert_eq!(log[0].project.as_ref().map(|p| p.id.as_str()), Some(project_id.as_str()));

        assert!(matches!(core.delete_task(&admin, &created.id), Err(AppError::NotFound(_))));
        assert!(matches!(
            core.update_task(&admin, &created.id, UpdateTaskPayload::default()),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn classify_follows_precedence() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let project_id = project(&core, &admin);
        let created = task(&core, &admin, &project_id, None);
        let record = core.db.get_task(&created.id).expect("get").expect("exists");

        let unchanged_assignee = UpdateTaskPayload {
            assigned_to: Some(None),
            ..UpdateTaskPayload::default()
        };
        assert_eq!(TaskChange::classify(&record, &unchanged_assignee), TaskChange::Unchanged);
        assert_eq!(
            TaskChange::classify(&record, &UpdateTaskPayload::default()),
            TaskChange::FieldEdit
        );
        assert_eq!(
            TaskChange::classify(
                &record,
                &UpdateTaskPayload {
                    status: Some(TaskStatus::Done),
                    ..UpdateTaskPayload::default()
                }
            ),
            TaskChange::Status {
                from: TaskStatus::ToDo,
                to: TaskStatus::Done
            }
        );
    }
}
