use crate::db::NewNotification;
use crate::errors::{AppError, AppResult};
use crate::models::{
    ActivityAction, CreateProjectPayload, MessageResponse, NotificationType, ProjectView, UpdateProjectPayload,
};
use crate::policy::Actor;
use crate::tracker::TrackerCore;

impl TrackerCore {
    /// Creates a project owned by `actor` and notifies every listed member except the actor.
    pub fn create_project(&self, actor: &Actor, payload: CreateProjectPayload) -> AppResult<ProjectView> {
        let title = required_text(payload.title.as_deref());
        let description = required_text(payload.description.as_deref());
        let (Some(title), Some(description), Some(deadline)) = (title, description, payload.deadline) else {
            return Err(AppError::Validation("Please provide all fields".to_string()));
        };
        let members = normalize_members(payload.members.unwrap_or_default());

        let project = self
            .db
            .insert_project(title, description, deadline, &actor.id, &members)?;

        self.activity.record(
            ActivityAction::ProjectCreated,
            &format!("Project \"{}\" was created", project.title),
            &actor.id,
            Some(&project.id),
            None,
        )?;

        let batch: Vec<NewNotification> = members
            .iter()
            .filter(|member| !actor.is(member))
            .map(|member| NewNotification {
                recipient_id: member.clone(),
                sender_id: Some(actor.id.clone()),
                kind: NotificationType::ProjectAssigned,
                message: format!("You have been added to project \"{}\"", project.title),
                link: Some(format!("/projects/{}/tasks", project.id)),
                project_id: Some(project.id.clone()),
                task_id: None,
            })
            .collect();
        let notified = self.notifications.dispatch_batch(batch)?.len();

        tracing::info!(
            project_id = %project.id,
            actor_id = %actor.id,
            members = members.len(),
            notified,
            "project created"
        );
        self.expand_project(project)
    }

    /// Admin-only partial update. Always logs exactly one `Project Updated` entry.
    pub fn update_project(
        &self,
        actor: &Actor,
        project_id: &str,
        payload: UpdateProjectPayload,
    ) -> AppResult<ProjectView> {
        self.guard.require_admin(actor, "project.update")?;
        let existing = self
            .db
            .get_project(project_id)?
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

        let changes = normalize_project_changes(payload)?;
        let updated = self
            .db
            .update_project(project_id, &changes)?
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

        self.activity.record(
            ActivityAction::ProjectUpdated,
            &format!("Project \"{}\" was updated", existing.title),
            &actor.id,
            Some(&updated.id),
            None,
        )?;

        tracing::info!(project_id = %updated.id, actor_id = %actor.id, "project updated");
        self.expand_project(updated)
    }

    /// Admin-only hard delete. Tasks, activity and notifications that reference the project stay behind.
    pub fn delete_project(&self, actor: &Actor, project_id: &str) -> AppResult<MessageResponse> {
        self.guard.require_admin(actor, "project.delete")?;
        let existing = self
            .db
            .get_project(project_id)?
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

        self.activity.record(
            ActivityAction::ProjectDeleted,
            &format!("Project \"{}\" was deleted", existing.title),
            &actor.id,
            None,
            None,
        )?;
        self.db.delete_project(project_id)?;

        tracing::info!(project_id = %project_id, actor_id = %actor.id, "project deleted");
        Ok(MessageResponse::new("Project removed"))
    }
}

/// Trimmed text, or `None` when absent or blank.
pub(crate) fn required_text(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

/// Member ids as a set: blanks dropped, first occurrence order kept.
fn normalize_members(members: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(members.len());
    for member in members {
        let member = member.trim();
        if member.is_empty() || unique.iter().any(|existing| existing == member) {
            continue;
        }
        unique.push(member.to_string());
    }
    unique
}

fn normalize_project_changes(payload: UpdateProjectPayload) -> AppResult<UpdateProjectPayload> {
    let title = match payload.title {
        Some(title) => Some(
            required_text(Some(&title))
                .ok_or_else(|| AppError::Validation("Please add a project title".to_string()))?
                .to_string(),
        ),
        None => None,
    };
    let description = match payload.description {
        Some(description) => Some(
            required_text(Some(&description))
                .ok_or_else(|| AppError::Validation("Please add a project description".to_string()))?
                .to_string(),
        ),
        None => None,
    };
    Ok(UpdateProjectPayload {
        title,
        description,
        deadline: payload.deadline,
        status: payload.status,
        members: payload.members.map(normalize_members),
    })
}

#[cfg(test)]
mod tests {
    use crate::errors::AppError;
    use crate::models::{
        ActivityAction, CreateProjectPayload, ListActivitiesFilters, ListTasksFilters, NotificationType,
        ProjectStatus, UpdateProjectPayload,
    };
    use crate::tracker::test_support::{core, user};
    use chrono::NaiveDate;

    fn payload(title: &str, members: Vec<String>) -> CreateProjectPayload {
        CreateProjectPayload {
            title: Some(title.to_string()),
            description: Some("quarterly goals".to_string()),
            deadline: NaiveDate::from_ymd_opt(2025, 9, 30),
            members: Some(members),
        }
    }

    #[test]
    fn create_notifies_members_but_never_the_actor() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let bob = user(&core, "Bob");
        let cy = user(&core, "Cy");

        let project = core
            .create_project(
                &admin,
                payload("Roadmap", vec![bob.id.clone(), admin.id.clone(), cy.id.clone(), bob.id.clone()]),
            )
            .expect("create");

        assert_eq!(project.members.len(), 3);
        assert_eq!(project.created_by.as_ref().map(|u| u.id.as_str()), Some(admin.id.as_str()));
        assert_eq!(project.status, ProjectStatus::Active);

        let for_bob = core.notifications.list_for(&bob.id, false).expect("bob");
        assert_eq!(for_bob.len(), 1);
        assert_eq!(for_bob[0].kind, NotificationType::ProjectAssigned);
        assert_eq!(for_bob[0].link.as_deref(), Some(format!("/projects/{}/tasks", project.id).as_str()));
        assert_eq!(core.notifications.list_for(&cy.id, false).expect("cy").len(), 1);
        assert!(core.notifications.list_for(&admin.id, false).expect("admin").is_empty());

        let log = core.list_activities(&ListActivitiesFilters::default()).expect("log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, ActivityAction::ProjectCreated);
        assert_eq!(log[0].project.as_ref().map(|p| p.title.as_str()), Some("Roadmap"));
    }

    #[test]
    fn create_rejects_missing_fields_without_side_effects() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let mut missing_deadline = payload("Roadmap", vec![]);
        missing_deadline.deadline = None;
        let blank_title = payload("   ", vec![]);

        for bad in [missing_deadline, blank_title] {
            assert!(matches!(core.create_project(&admin, bad), Err(AppError::Validation(_))));
        }
        assert!(core.list_projects().expect("list").is_empty());
        assert!(core
            .list_activities(&ListActivitiesFilters::default())
            .expect("log")
            .is_empty());
    }

    #[test]
    fn member_cannot_update_or_delete() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let member = user(&core, "Bob");
        let project = core.create_project(&member, payload("Mine", vec![])).expect("create");

        let update = core.update_project(
            &member,
            &project.id,
            UpdateProjectPayload {
                title: Some("Hijacked".to_string()),
                ..UpdateProjectPayload::default()
            },
        );
        assert!(matches!(update, Err(AppError::Forbidden(_))));
        assert!(matches!(core.delete_project(&member, &project.id), Err(AppError::Forbidden(_))));
        assert_eq!(core.get_project(&project.id).expect("get").title, "Mine");
        assert_eq!(core.list_activities(&ListActivitiesFilters::default()).expect("log").len(), 1);

        assert!(matches!(
            core.update_project(&admin, "missing", UpdateProjectPayload::default()),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(core.delete_project(&admin, "missing"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn update_logs_once_with_previous_title() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let project = core.create_project(&admin, payload("Old", vec![])).expect("create");

        let updated = core
            .update_project(
                &admin,
                &project.id,
                UpdateProjectPayload {
                    title: Some("  New  ".to_string()),
                    status: Some(ProjectStatus::Completed),
                    ..UpdateProjectPayload::default()
                },
            )
            .expect("update");
        assert_eq!(updated.title, "New");
        assert_eq!(updated.status, ProjectStatus::Completed);

        let log = core.list_activities(&ListActivitiesFilters::default()).expect("log");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action, ActivityAction::ProjectUpdated);
        assert_eq!(log[0].description, "Project \"Old\" was updated");
    }

    #[test]
    fn delete_logs_without_project_reference_and_leaves_orphans() {
        let (_dir, core) = core();
        let admin = user(&core, "Ada");
        let project = core.create_project(&admin, payload("Doomed", vec![])).expect("create");
        let task = core
            .create_task(
                &admin,
                crate::models::CreateTaskPayload {
                    title: Some("Leftover".to_string()),
                    description: Some("d".to_string()),
                    due_date: NaiveDate::from_ymd_opt(2025, 10, 1),
                    project: Some(project.id.clone()),
                    ..Default::default()
                },
            )
            .expect("task");

        let response = core.delete_project(&admin, &project.id).expect("delete");
        assert_eq!(response.message, "Project removed");
        assert!(matches!(core.get_project(&project.id), Err(AppError::NotFound(_))));

        let log = core.list_activities(&ListActivitiesFilters::default()).expect("log");
        assert_eq!(log[0].action, ActivityAction::ProjectDeleted);
        assert!(log[0].project.is_none());

        let orphans = core
            .list_tasks(&ListTasksFilters {
                project: Some(project.id.clone()),
            })
            .expect("tasks");
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, task.id);
        assert!(orphans[0].project.is_none());
    }
}
