use crate::errors::{AppError, AppResult};
use crate::models::{
    ActivityAction, ActivityRecord, NotificationRecord, NotificationType, ProjectRecord, ProjectStatus,
    ProjectSummary, Role, TaskPriority, TaskRecord, TaskStatus, TaskSummary, UpdateProjectPayload,
    UpdateTaskPayload, UserRecord, UserSummary,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const USER_COLUMNS: &str = "id, name, email, role, password_hash, created_at, updated_at";
const PROJECT_COLUMNS: &str = "id, title, description, deadline, status, created_by, created_at, updated_at";
const TASK_COLUMNS: &str =
    "id, title, description, priority, status, due_date, assigned_to, project_id, created_by, created_at, updated_at";
const ACTIVITY_COLUMNS: &str = "id, action, description, user_id, project_id, task_id, created_at";
const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, sender_id, type, message, link, read, project_id, task_id, created_at";

/// Insert-side shape of a notification; id, read flag and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: String,
    pub sender_id: Option<String>,
    pub kind: NotificationType,
    pub message: String,
    pub link: Option<String>,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub due_date: NaiveDate,
    pub assigned_to: Option<&'a str>,
    pub project_id: &'a str,
    pub created_by: &'a str,
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    /// Inserts a user; the very first user becomes `Admin`, every later one `Member`.
    pub fn register_user(&self, name: &str, email: &str, password_hash: &str) -> AppResult<UserRecord> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let existing: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let role = if existing == 0 { Role::Admin } else { Role::Member };
        tx.execute(
            "INSERT INTO users (id, name, email, role, password_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, name, email, role.as_str(), password_hash, format_time(now)],
        )
        .map_err(|error| conflict_on_duplicate(error, "User already exists"))?;
        tx.commit()?;

        Ok(UserRecord {
            id,
            name: name.to_string(),
            email: email.to_string(),
            role,
            password_hash: password_hash.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_user(&self, user_id: &str) -> AppResult<Option<UserRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [user_id],
            parse_user_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn find_user_by_email(&self, email: &str) -> AppResult<Option<UserRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 COLLATE NOCASE"),
            [email],
            parse_user_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_users(&self) -> AppResult<Vec<UserRecord>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY name COLLATE NOCASE ASC, created_at ASC"
        ))?;
        let users = statement
            .query_map([], parse_user_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn update_user_profile(&self, user_id: &str, name: &str, email: &str) -> AppResult<Option<UserRecord>> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE users SET name = ?1, email = ?2, updated_at = ?3 WHERE id = ?4",
            params![name, email, format_time(Utc::now()), user_id],
        )
        .map_err(|error| conflict_on_duplicate(error, "Email already in use"))?;
        if changed == 0 {
            return Ok(None);
        }
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [user_id],
            parse_user_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn update_user_password(&self, user_id: &str, password_hash: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![password_hash, format_time(Utc::now()), user_id],
        )?;
        Ok(changed > 0)
    }

    /// Resolves user ids to summaries; ids with no matching user are absent from the map.
    pub fn user_summaries(&self, user_ids: &[&str]) -> AppResult<HashMap<String, UserSummary>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare("SELECT id, name, email FROM users WHERE id = ?1")?;
        let mut result = HashMap::new();
        for user_id in user_ids {
            if result.contains_key(*user_id) {
                continue;
            }
            let summary = statement
                .query_row([user_id], |row| {
                    Ok(UserSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                    })
                })
                .optional()?;
            if let Some(summary) = summary {
                result.insert(summary.id.clone(), summary);
            }
        }
        Ok(result)
    }

    pub fn insert_project(
        &self,
        title: &str,
        description: &str,
        deadline: NaiveDate,
        created_by: &str,
        members: &[String],
    ) -> AppResult<ProjectRecord> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let status = ProjectStatus::default();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO projects (id, title, description, deadline, status, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                title,
                description,
                format_date(deadline),
                status.as_str(),
                created_by,
                format_time(now)
            ],
        )?;
        write_members(&tx, &id, members)?;
        tx.commit()?;

        Ok(ProjectRecord {
            id,
            title: title.to_string(),
            description: description.to_string(),
            deadline,
            status,
            created_by: created_by.to_string(),
            members: members.to_vec(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_project(&self, project_id: &str) -> AppResult<Option<ProjectRecord>> {
        let conn = self.lock()?;
        fetch_project(&conn, project_id)
    }

    pub fn list_projects(&self) -> AppResult<Vec<ProjectRecord>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC, rowid DESC"
        ))?;
        let mut projects = statement
            .query_map([], parse_project_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for project in &mut projects {
            project.members = fetch_members(&conn, &project.id)?;
        }
        Ok(projects)
    }

    /// Overwrites the fields present in `changes`; `members`, when present, replaces the whole set.
    pub fn update_project(&self, project_id: &str, changes: &UpdateProjectPayload) -> AppResult<Option<ProjectRecord>> {
        let mut assignments = vec!["updated_at = ?"];
        let mut values: Vec<Option<String>> = vec![Some(format_time(Utc::now()))];
        if let Some(title) = &changes.title {
            assignments.push("title = ?");
            values.push(Some(title.clone()));
        }
        if let Some(description) = &changes.description {
            assignments.push("description = ?");
            values.push(Some(description.clone()));
        }
        if let Some(deadline) = changes.deadline {
            assignments.push("deadline = ?");
            values.push(Some(format_date(deadline)));
        }
        if let Some(status) = changes.status {
            assignments.push("status = ?");
            values.push(Some(status.as_str().to_string()));
        }
        values.push(Some(project_id.to_string()));

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let query = format!("UPDATE projects SET {} WHERE id = ?", assignments.join(", "));
        let changed = tx.execute(&query, rusqlite::params_from_iter(values.iter()))?;
        if changed == 0 {
            return Ok(None);
        }
        if let Some(members) = &changes.members {
            tx.execute("DELETE FROM project_members WHERE project_id = ?1", [project_id])?;
            write_members(&tx, project_id, members)?;
        }
        let updated = fetch_project(&tx, project_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Removes the project row and its member set. Tasks, activity and notifications are left alone.
    pub fn delete_project(&self, project_id: &str) -> AppResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM projects WHERE id = ?1", [project_id])?;
        tx.execute("DELETE FROM project_members WHERE project_id = ?1", [project_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn project_summaries(&self, project_ids: &[&str]) -> AppResult<HashMap<String, ProjectSummary>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare("SELECT id, title FROM projects WHERE id = ?1")?;
        let mut result = HashMap::new();
        for project_id in project_ids {
            if result.contains_key(*project_id) {
                continue;
            }
            let summary = statement
                .query_row([project_id], |row| {
                    Ok(ProjectSummary {
                        id: row.get(0)?,
                        title: row.get(1)?,
                    })
                })
                .optional()?;
            if let Some(summary) = summary {
                result.insert(summary.id.clone(), summary);
            }
        }
        Ok(result)
    }

    pub fn insert_task(&self, task: &NewTask<'_>) -> AppResult<TaskRecord> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (
               id, title, description, priority, status, due_date, assigned_to, project_id, created_by,
               created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                id,
                task.title,
                task.description,
                task.priority.as_str(),
                task.status.as_str(),
                format_date(task.due_date),
                task.assigned_to,
                task.project_id,
                task.created_by,
                format_time(now),
            ],
        )?;

        Ok(TaskRecord {
            id,
            title: task.title.to_string(),
            description: task.description.to_string(),
            priority: task.priority,
            status: task.status,
            due_date: task.due_date,
            assigned_to: task.assigned_to.map(ToString::to_string),
            project_id: task.project_id.to_string(),
            created_by: task.created_by.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_task(&self, task_id: &str) -> AppResult<Option<TaskRecord>> {
        let conn = self.lock()?;
        fetch_task(&conn, task_id)
    }

    pub fn list_tasks(&self, project_id: Option<&str>) -> AppResult<Vec<TaskRecord>> {
        let conn = self.lock()?;
        let mut query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1");
        let mut params_vec: Vec<String> = Vec::new();
        if let Some(project_id) = project_id {
            query.push_str(" AND project_id = ?");
            params_vec.push(project_id.to_string());
        }
        query.push_str(" ORDER BY created_at DESC, rowid DESC");

        let mut statement = conn.prepare(&query)?;
        let tasks = statement
            .query_map(rusqlite::params_from_iter(params_vec.iter()), parse_task_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Overwrites the fields present in `changes`. `assigned_to: Some(None)` clears the assignee.
    pub fn update_task(&self, task_id: &str, changes: &UpdateTaskPayload) -> AppResult<Option<TaskRecord>> {
        let mut assignments = vec!["updated_at = ?"];
        let mut values: Vec<Option<String>> = vec![Some(format_time(Utc::now()))];
        if let Some(title) = &changes.title {
            assignments.push("title = ?");
            values.push(Some(title.clone()));
        }
        if let Some(description) = &changes.description {
            assignments.push("description = ?");
            values.push(Some(description.clone()));
        }
        if let Some(priority) = changes.priority {
            assignments.push("priority = ?");
            values.push(Some(priority.as_str().to_string()));
        }
        if let Some(status) = changes.status {
            assignments.push("status = ?");
            values.push(Some(status.as_str().to_string()));
        }
        if let Some(due_date) = changes.due_date {
            assignments.push("due_date = ?");
            values.push(Some(format_date(due_date)));
        }
        if let Some(assigned_to) = &changes.assigned_to {
            assignments.push("assigned_to = ?");
            values.push(assigned_to.clone());
        }
        values.push(Some(task_id.to_string()));

        let conn = self.lock()?;
        let query = format!("UPDATE tasks SET {} WHERE id = ?", assignments.join(", "));
        let changed = conn.execute(&query, rusqlite::params_from_iter(values.iter()))?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_task(&conn, task_id)
    }

    pub fn delete_task(&self, task_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", [task_id])?;
        Ok(deleted > 0)
    }

    pub fn task_summaries(&self, task_ids: &[&str]) -> AppResult<HashMap<String, TaskSummary>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare("SELECT id, title FROM tasks WHERE id = ?1")?;
        let mut result = HashMap::new();
        for task_id in task_ids {
            if result.contains_key(*task_id) {
                continue;
            }
            let summary = statement
                .query_row([task_id], |row| {
                    Ok(TaskSummary {
                        id: row.get(0)?,
                        title: row.get(1)?,
                    })
                })
                .optional()?;
            if let Some(summary) = summary {
                result.insert(summary.id.clone(), summary);
            }
        }
        Ok(result)
    }

    pub fn insert_activity(
        &self,
        action: ActivityAction,
        description: &str,
        user_id: &str,
        project_id: Option<&str>,
        task_id: Option<&str>,
    ) -> AppResult<ActivityRecord> {
        let created_at = Utc::now();
        let id = Uuid::new_v4().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO activity_logs (id, action, description, user_id, project_id, task_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                action.as_str(),
                description,
                user_id,
                project_id,
                task_id,
                format_time(created_at)
            ],
        )?;

        Ok(ActivityRecord {
            id,
            action,
            description: description.to_string(),
            user_id: user_id.to_string(),
            project_id: project_id.map(ToString::to_string),
            task_id: task_id.map(ToString::to_string),
            created_at,
        })
    }

    pub fn list_activities(&self, project_id: Option<&str>, limit: i64) -> AppResult<Vec<ActivityRecord>> {
        let conn = self.lock()?;
        let mut query = format!("SELECT {ACTIVITY_COLUMNS} FROM activity_logs WHERE 1 = 1");
        let mut params_vec: Vec<String> = Vec::new();
        if let Some(project_id) = project_id {
            query.push_str(" AND project_id = ?");
            params_vec.push(project_id.to_string());
        }
        query.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?");

        let mut statement = conn.prepare(&query)?;
        let mut dyn_params: Vec<&dyn rusqlite::ToSql> = params_vec
            .iter()
            .map(|param| param as &dyn rusqlite::ToSql)
            .collect();
        dyn_params.push(&limit);

        let activities = statement
            .query_map(rusqlite::params_from_iter(dyn_params), parse_activity_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(activities)
    }

    /// Writes all notifications in one transaction.
    pub fn insert_notifications(&self, batch: &[NewNotification]) -> AppResult<Vec<NotificationRecord>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let created_at = Utc::now();
        let created_at_raw = format_time(created_at);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut records = Vec::with_capacity(batch.len());
        {
            let mut statement = tx.prepare(
                "INSERT INTO notifications (
                   id, recipient_id, sender_id, type, message, link, read, project_id, task_id, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9)",
            )?;
            for item in batch {
                let id = Uuid::new_v4().to_string();
                statement.execute(params![
                    id,
                    item.recipient_id,
                    item.sender_id,
                    item.kind.as_str(),
                    item.message,
                    item.link,
                    item.project_id,
                    item.task_id,
                    created_at_raw,
                ])?;
                records.push(NotificationRecord {
                    id,
                    recipient_id: item.recipient_id.clone(),
                    sender_id: item.sender_id.clone(),
                    kind: item.kind,
                    message: item.message.clone(),
                    link: item.link.clone(),
                    read: false,
                    project_id: item.project_id.clone(),
                    task_id: item.task_id.clone(),
                    created_at,
                });
            }
        }
        tx.commit()?;
        Ok(records)
    }

    pub fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: i64,
    ) -> AppResult<Vec<NotificationRecord>> {
        let conn = self.lock()?;
        let mut query = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE recipient_id = ?1");
        if unread_only {
            query.push_str(" AND read = 0");
        }
        query.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?2");

        let mut statement = conn.prepare(&query)?;
        let notifications = statement
            .query_map(params![recipient_id, limit], parse_notification_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    pub fn count_unread_notifications(&self, recipient_id: &str) -> AppResult<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND read = 0",
            [recipient_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Marks one notification read, only if it belongs to `recipient_id`.
    pub fn mark_notification_read(
        &self,
        notification_id: &str,
        recipient_id: &str,
    ) -> AppResult<Option<NotificationRecord>> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient_id = ?2",
            params![notification_id, recipient_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        conn.query_row(
            &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
            [notification_id],
            parse_notification_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn mark_all_notifications_read(&self, recipient_id: &str) -> AppResult<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
            [recipient_id],
        )?;
        Ok(changed)
    }

    pub fn delete_notification(&self, notification_id: &str, recipient_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
            params![notification_id, recipient_id],
        )?;
        Ok(deleted > 0)
    }
}

fn write_members(conn: &Connection, project_id: &str, members: &[String]) -> AppResult<()> {
    let mut statement = conn.prepare(
        "INSERT OR IGNORE INTO project_members (project_id, user_id, position) VALUES (?1, ?2, ?3)",
    )?;
    for (position, user_id) in members.iter().enumerate() {
        statement.execute(params![project_id, user_id, position as i64])?;
    }
    Ok(())
}

fn fetch_members(conn: &Connection, project_id: &str) -> AppResult<Vec<String>> {
    let mut statement =
        conn.prepare("SELECT user_id FROM project_members WHERE project_id = ?1 ORDER BY position ASC")?;
    let members = statement
        .query_map([project_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

fn fetch_project(conn: &Connection, project_id: &str) -> AppResult<Option<ProjectRecord>> {
    let project = conn
        .query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            [project_id],
            parse_project_row,
        )
        .optional()?;
    match project {
        Some(mut project) => {
            project.members = fetch_members(conn, project_id)?;
            Ok(Some(project))
        }
        None => Ok(None),
    }
}

fn fetch_task(conn: &Connection, task_id: &str) -> AppResult<Option<TaskRecord>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        [task_id],
        parse_task_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn parse_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let role_raw: String = row.get(3)?;
    Ok(UserRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: Role::parse(&role_raw).ok_or_else(|| invalid_text("role", &role_raw))?,
        password_hash: row.get(4)?,
        created_at: parse_time(&row.get::<_, String>(5)?)?,
        updated_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}

/// Leaves `members` empty; callers fill it from `project_members`.
fn parse_project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectRecord> {
    let status_raw: String = row.get(4)?;
    Ok(ProjectRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        deadline: parse_date(&row.get::<_, String>(3)?)?,
        status: ProjectStatus::parse(&status_raw).ok_or_else(|| invalid_text("project status", &status_raw))?,
        created_by: row.get(5)?,
        members: Vec::new(),
        created_at: parse_time(&row.get::<_, String>(6)?)?,
        updated_at: parse_time(&row.get::<_, String>(7)?)?,
    })
}

fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let priority_raw: String = row.get(3)?;
    let status_raw: String = row.get(4)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        priority: TaskPriority::parse(&priority_raw).ok_or_else(|| invalid_text("priority", &priority_raw))?,
        status: TaskStatus::parse(&status_raw).ok_or_else(|| invalid_text("task status", &status_raw))?,
        due_date: parse_date(&row.get::<_, String>(5)?)?,
        assigned_to: row.get(6)?,
        project_id: row.get(7)?,
        created_by: row.get(8)?,
        created_at: parse_time(&row.get::<_, String>(9)?)?,
        updated_at: parse_time(&row.get::<_, String>(10)?)?,
    })
}

fn parse_activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityRecord> {
    let action_raw: String = row.get(1)?;
    Ok(ActivityRecord {
        id: row.get(0)?,
        action: ActivityAction::parse(&action_raw).ok_or_else(|| invalid_text("activity action", &action_raw))?,
        description: row.get(2)?,
        user_id: row.get(3)?,
        project_id: row.get(4)?,
        task_id: row.get(5)?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}

fn parse_notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRecord> {
    let kind_raw: String = row.get(3)?;
    Ok(NotificationRecord {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        sender_id: row.get(2)?,
        kind: NotificationType::parse(&kind_raw).ok_or_else(|| invalid_text("notification type", &kind_raw))?,
        message: row.get(4)?,
        link: row.get(5)?,
        read: row.get(6)?,
        project_id: row.get(7)?,
        task_id: row.get(8)?,
        created_at: parse_time(&row.get::<_, String>(9)?)?,
    })
}

/// The email UNIQUE index is the final arbiter when two writers race past the lookup.
fn conflict_on_duplicate(error: rusqlite::Error, message: &str) -> AppError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &error {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            return AppError::Conflict(message.to_string());
        }
    }
    AppError::from(error)
}

fn invalid_text(what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Unknown {} '{}'", what, raw),
        )),
    )
}

/// Fixed-width timestamps so lexical order in SQLite matches chronological order.
fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

fn format_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{Database, NewNotification, NewTask};
    use crate::errors::AppError;
    use crate::models::{
        ActivityAction, NotificationType, ProjectStatus, Role, TaskPriority, TaskStatus, UpdateProjectPayload,
        UpdateTaskPayload,
    };
    use chrono::NaiveDate;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        (dir, db)
    }

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn duplicate_email_insert_is_a_conflict() {
        let (_dir, db) = open();
        let ada = db.register_user("Ada", "ada@example.com", "hash").expect("ada");
        let bob = db.register_user("Bob", "bob@example.com", "hash").expect("bob");

        let raced = db.register_user("Ada Again", "ADA@example.com", "hash");
        assert!(matches!(raced, Err(AppError::Conflict(message)) if message == "User already exists"));

        let taken = db.update_user_profile(&bob.id, "Bob", "Ada@Example.com");
        assert!(matches!(taken, Err(AppError::Conflict(_))));
        assert_eq!(db.list_users().expect("users").len(), 2);
        assert_eq!(db.get_user(&ada.id).expect("get").expect("ada").email, "ada@example.com");
    }

    #[test]
    fn first_registered_user_is_admin_and_later_ones_are_members() {
        let (_dir, db) = open();
        let first = db.register_user("Ada", "ada@example.com", "hash").expect("first");
        let second = db.register_user("Bob", "bob@example.com", "hash").expect("second");
        assert_eq!(first.role, Role::Admin);
        assert_eq!(second.role, Role::Member);

        let found = db
            .find_user_by_email("ADA@example.com")
            .expect("lookup")
            .expect("exists");
        assert_eq!(found.id, first.id);
        assert!(db.register_user("Dup", "Bob@Example.com", "hash").is_err());
    }

    #[test]
    fn project_members_round_trip_without_duplicates() {
        let (_dir, db) = open();
        let project = db
            .insert_project(
                "Launch",
                "ship it",
                date("2025-06-01"),
                "u-1",
                &["u-2".to_string(), "u-3".to_string(), "u-2".to_string()],
            )
            .expect("insert project");

        let loaded = db.get_project(&project.id).expect("get").expect("exists");
        assert_eq!(loaded.members, vec!["u-2".to_string(), "u-3".to_string()]);
        assert_eq!(loaded.status, ProjectStatus::Active);
        assert_eq!(loaded.deadline, date("2025-06-01"));

        let updated = db
            .update_project(
                &project.id,
                &UpdateProjectPayload {
                    status: Some(ProjectStatus::OnHold),
                    members: Some(vec!["u-4".to_string()]),
                    ..UpdateProjectPayload::default()
                },
            )
            .expect("update")
            .expect("exists");
        assert_eq!(updated.title, "Launch");
        assert_eq!(updated.status, ProjectStatus::OnHold);
        assert_eq!(updated.members, vec!["u-4".to_string()]);

        assert!(db
            .update_project("missing", &UpdateProjectPayload::default())
            .expect("update missing")
            .is_none());
    }

    #[test]
    fn deleting_project_keeps_tasks() {
        let (_dir, db) = open();
        let project = db
            .insert_project("P", "d", date("2025-01-01"), "u-1", &[])
            .expect("project");
        db.insert_task(&NewTask {
            title: "T",
            description: "d",
            priority: TaskPriority::High,
            status: TaskStatus::ToDo,
            due_date: date("2025-01-02"),
            assigned_to: None,
            project_id: &project.id,
            created_by: "u-1",
        })
        .expect("task");

        assert!(db.delete_project(&project.id).expect("delete"));
        assert!(!db.delete_project(&project.id).expect("delete again"));
        assert_eq!(db.list_tasks(Some(&project.id)).expect("tasks").len(), 1);
        assert!(db.project_summaries(&[project.id.as_str()]).expect("summaries").is_empty());
    }

    #[test]
    fn task_update_can_clear_assignee() {
        let (_dir, db) = open();
        let task = db
            .insert_task(&NewTask {
                title: "T",
                description: "d",
                priority: TaskPriority::Medium,
                status: TaskStatus::ToDo,
                due_date: date("2025-01-02"),
                assigned_to: Some("u-2"),
                project_id: "p-1",
                created_by: "u-1",
            })
            .expect("task");

        let cleared = db
            .update_task(
                &task.id,
                &UpdateTaskPayload {
                    assigned_to: Some(None),
                    status: Some(TaskStatus::InProgress),
                    ..UpdateTaskPayload::default()
                },
            )
            .expect("update")
            .expect("exists");
        assert_eq!(cleared.assigned_to, None);
        assert_eq!(cleared.status, TaskStatus::InProgress);
        assert_eq!(cleared.project_id, "p-1");
    }

    #[test]
    fn activity_listing_is_newest_first_and_limited() {
        let (_dir, db) = open();
        for index in 0..5 {
            db.insert_activity(
                ActivityAction::TaskCreated,
                &format!("entry {}", index),
                "u-1",
                Some("p-1"),
                None,
            )
            .expect("insert activity");
        }
        db.insert_activity(ActivityAction::ProjectDeleted, "other", "u-1", None, None)
            .expect("insert unscoped");

        let latest = db.list_activities(None, 3).expect("list");
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].description, "other");
        assert_eq!(latest[1].description, "entry 4");

        let scoped = db.list_activities(Some("p-1"), 50).expect("list scoped");
        assert_eq!(scoped.len(), 5);
        assert!(scoped.iter().all(|entry| entry.project_id.as_deref() == Some("p-1")));
    }

    #[test]
    fn notification_mutations_are_scoped_to_recipient() {
        let (_dir, db) = open();
        let created = db
            .insert_notifications(&[
                NewNotification {
                    recipient_id: "u-2".to_string(),
                    sender_id: Some("u-1".to_string()),
                    kind: NotificationType::ProjectAssigned,
                    message: "hello".to_string(),
                    link: None,
                    project_id: None,
                    task_id: None,
                },
                NewNotification {
                    recipient_id: "u-3".to_string(),
                    sender_id: Some("u-1".to_string()),
                    kind: NotificationType::ProjectAssigned,
                    message: "hello".to_string(),
                    link: None,
                    project_id: None,
                    task_id: None,
                },
            ])
            .expect("insert batch");
        assert_eq!(created.len(), 2);

        let foreign = &created[1].id;
        assert!(db.mark_notification_read(foreign, "u-2").expect("mark foreign").is_none());
        assert!(!db.delete_notification(foreign, "u-2").expect("delete foreign"));
        assert_eq!(db.count_unread_notifications("u-3").expect("count"), 1);

        let own = db
            .mark_notification_read(&created[0].id, "u-2")
            .expect("mark own")
            .expect("exists");
        assert!(own.read);
        assert_eq!(db.count_unread_notifications("u-2").expect("count"), 0);
        assert!(db.list_notifications("u-2", true, 50).expect("unread").is_empty());
        assert_eq!(db.list_notifications("u-2", false, 50).expect("all").len(), 1);

        assert_eq!(db.mark_all_notifications_read("u-3").expect("mark all"), 1);
        assert!(db.delete_notification(foreign, "u-3").expect("delete own"));
    }
}
