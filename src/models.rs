use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Member => "Member",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Admin" => Some(Self::Admin),
            "Member" => Some(Self::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProjectStatus {
    #[default]
    Active,
    Completed,
    #[serde(rename = "On Hold")]
    OnHold,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Completed => "Completed",
            Self::OnHold => "On Hold",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Active" => Some(Self::Active),
            "Completed" => Some(Self::Completed),
            "On Hold" => Some(Self::OnHold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Low" => Some(Self::Low),
            "Medium" => Some(Self::Medium),
            "High" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "To Do")]
    ToDo,
    #[serde(rename = "In Progress")]
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToDo => "To Do",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "To Do" => Some(Self::ToDo),
            "In Progress" => Some(Self::InProgress),
            "Done" => Some(Self::Done),
            _ => None,
        }
    }
}

/// Fixed set of activity log tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityAction {
    #[serde(rename = "Task Created")]
    TaskCreated,
    #[serde(rename = "Task Updated")]
    TaskUpdated,
    #[serde(rename = "Task Moved")]
    TaskMoved,
    #[serde(rename = "Task Completed")]
    TaskCompleted,
    #[serde(rename = "Task Deleted")]
    TaskDeleted,
    #[serde(rename = "User Assigned")]
    UserAssigned,
    #[serde(rename = "User Unassigned")]
    UserUnassigned,
    #[serde(rename = "Project Created")]
    ProjectCreated,
    #[serde(rename = "Project Updated")]
    ProjectUpdated,
    #[serde(rename = "Project Deleted")]
    ProjectDeleted,
}

impl ActivityAction {
    pub const ALL: [ActivityAction; 10] = [
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskMoved,
        Self::TaskCompleted,
        Self::TaskDeleted,
        Self::UserAssigned,
        Self::UserUnassigned,
        Self::ProjectCreated,
        Self::ProjectUpdated,
        Self::ProjectDeleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "Task Created",
            Self::TaskUpdated => "Task Updated",
            Self::TaskMoved => "Task Moved",
            Self::TaskCompleted => "Task Completed",
            Self::TaskDeleted => "Task Deleted",
            Self::UserAssigned => "User Assigned",
            Self::UserUnassigned => "User Unassigned",
            Self::ProjectCreated => "Project Created",
            Self::ProjectUpdated => "Project Updated",
            Self::ProjectDeleted => "Project Deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationType {
    #[serde(rename = "Task Assigned")]
    TaskAssigned,
    #[serde(rename = "Task Updated")]
    TaskUpdated,
    #[serde(rename = "Project Assigned")]
    ProjectAssigned,
    #[serde(rename = "Task Completed")]
    TaskCompleted,
    Mention,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskAssigned => "Task Assigned",
            Self::TaskUpdated => "Task Updated",
            Self::ProjectAssigned => "Project Assigned",
            Self::TaskCompleted => "Task Completed",
            Self::Mention => "Mention",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Task Assigned" => Some(Self::TaskAssigned),
            "Task Updated" => Some(Self::TaskUpdated),
            "Project Assigned" => Some(Self::ProjectAssigned),
            "Task Completed" => Some(Self::TaskCompleted),
            "Mention" => Some(Self::Mention),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub deadline: NaiveDate,
    pub status: ProjectStatus,
    pub created_by: String,
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub title: String,
}

/// Project with `createdBy` and `members` resolved to user summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub deadline: NaiveDate,
    pub status: ProjectStatus,
    pub created_by: Option<UserSummary>,
    pub members: Vec<UserSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub due_date: NaiveDate,
    pub assigned_to: Option<String>,
    pub project_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
}

/// Task with references expanded. `project` is `None` once the project is gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub due_date: NaiveDate,
    pub assigned_to: Option<UserSummary>,
    pub project: Option<ProjectSummary>,
    pub created_by: Option<UserSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub id: String,
    pub action: ActivityAction,
    pub description: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityView {
    pub id: String,
    pub action: ActivityAction,
    pub description: String,
    pub user: Option<UserSummary>,
    pub project: Option<ProjectSummary>,
    pub task: Option<TaskSummary>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRecord {
    pub id: String,
    pub recipient_id: String,
    pub sender_id: Option<String>,
    pub kind: NotificationType,
    pub message: String,
    pub link: Option<String>,
    pub read: bool,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: String,
    pub recipient: String,
    pub sender: Option<UserSummary>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
    pub link: Option<String>,
    pub read: bool,
    pub project: Option<ProjectSummary>,
    pub task: Option<TaskSummary>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfilePayload {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordPayload {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "flexible_date::deserialize_opt")]
    pub deadline: Option<NaiveDate>,
    pub members: Option<Vec<String>>,
}

/// Partial project update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "flexible_date::deserialize_opt")]
    pub deadline: Option<NaiveDate>,
    pub status: Option<ProjectStatus>,
    pub members: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "flexible_date::deserialize_opt")]
    pub due_date: Option<NaiveDate>,
    pub project: Option<String>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<String>,
}

/// Partial task update. `assigned_to` distinguishes an absent key (`None`)
/// from an explicit `null` (`Some(None)`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "flexible_date::deserialize_opt")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub assigned_to: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksFilters {
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListActivitiesFilters {
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsFilters {
    pub unread: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp, keeping the calendar date.
pub mod flexible_date {
    use chrono::{DateTime, NaiveDate};
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => parse(value)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{}'", value))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ActivityAction, TaskStatus, UpdateTaskPayload};

    #[test]
    fn update_payload_distinguishes_null_from_absent_assignee() {
        let absent: UpdateTaskPayload = serde_json::from_str(r#"{"title":"x"}"#).expect("absent");
        assert_eq!(absent.assigned_to, None);

        let cleared: UpdateTaskPayload = serde_json::from_str(r#"{"assignedTo":null}"#).expect("null");
        assert_eq!(cleared.assigned_to, Some(None));

        let set: UpdateTaskPayload = serde_json::from_str(r#"{"assignedTo":"u-1"}"#).expect("set");
        assert_eq!(set.assigned_to, Some(Some("u-1".to_string())));
    }

    #[test]
    fn due_date_accepts_plain_and_timestamp_forms() {
        let plain: UpdateTaskPayload = serde_json::from_str(r#"{"dueDate":"2025-03-01"}"#).expect("plain");
        let stamped: UpdateTaskPayload =
            serde_json::from_str(r#"{"dueDate":"2025-03-01T00:00:00.000Z"}"#).expect("stamped");
        assert_eq!(plain.due_date, stamped.due_date);
        assert!(serde_json::from_str::<UpdateTaskPayload>(r#"{"dueDate":"soon"}"#).is_err());
    }

    #[test]
    fn status_strings_use_display_labels() {
        assert_eq!(serde_json::to_string(&TaskStatus::ToDo).expect("json"), "\"To Do\"");
        assert_eq!(TaskStatus::parse("In Progress"), Some(TaskStatus::InProgress));
        for action in ActivityAction::ALL {
            assert_eq!(ActivityAction::parse(action.as_str()), Some(action));
        }
    }
}
