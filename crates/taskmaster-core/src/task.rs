use serde::{Deserialize, Serialize};

/// Workflow state as the task store spells it.
///
/// Statuses this crate does not know are kept verbatim in `Other` so a
/// rewrite of the store file hands them back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Completed,
    Other(String),
}

impl TaskStatus {
    pub fn is_completed(&self) -> bool {
        *self == TaskStatus::Completed
    }

    pub fn from_key(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" | "in-progress" | "inprogress" => Some(TaskStatus::InProgress),
            "completed" | "done" => Some(TaskStatus::Completed),
            _ => None,
        }
    }

    /// Spelling written back to the store.
    pub fn as_wire(&self) -> &str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Other(raw) => raw,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for TaskStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "TODO" | "todo" | "Todo" => TaskStatus::Todo,
            "IN_PROGRESS" | "in_progress" | "InProgress" => TaskStatus::InProgress,
            "COMPLETED" | "completed" | "Completed" | "DONE" => TaskStatus::Completed,
            _ => TaskStatus::Other(raw),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Other(raw) => raw,
            known => known.as_wire().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    #[serde(alias = "low", alias = "Low")]
    Low,
    #[serde(alias = "medium", alias = "Medium")]
    Medium,
    #[serde(alias = "high", alias = "High")]
    High,
}

impl TaskPriority {
    pub fn from_key(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Some(TaskPriority::Low),
            "m" | "med" | "medium" => Some(TaskPriority::Medium),
            "h" | "high" => Some(TaskPriority::High),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }
}

/// A task record as the task store hands it out.
///
/// `due_date` stays a raw string: records with a malformed value must still
/// load so the calendar can skip them instead of failing the whole list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub due_date: Option<String>,

    #[serde(default)]
    pub priority: Option<TaskPriority>,

    pub status: TaskStatus,

    #[serde(default)]
    pub assigned_to: Option<String>,
}

impl Task {
    pub fn new_todo(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            due_date: None,
            priority: None,
            status: TaskStatus::Todo,
            assigned_to: None,
        }
    }

    pub fn with_due(mut self, due: impl Into<String>) -> Self {
        self.due_date = Some(due.into());
        self
    }

    /// Display title, falling back to the description and then the id.
    pub fn display_title(&self) -> String {
        let title = self.title.trim();
        if !title.is_empty() {
            return title.to_string();
        }

        if let Some(description) = self.description.as_deref().map(str::trim)
            && !description.is_empty()
        {
            return description.to_string();
        }

        format!("Task {}", self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<TaskPriority>,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
}

/// Partial update. `None` leaves a field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_date: Option<Option<String>>,
    pub priority: Option<Option<TaskPriority>>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<Option<String>>,
}

impl TaskPatch {
    pub fn reschedule(day_key: impl Into<String>) -> Self {
        Self {
            due_date: Some(Some(day_key.into())),
            ..Self::default()
        }
    }

    pub fn apply_to(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(assigned_to) = self.assigned_to {
            task.assigned_to = assigned_to;
        }
    }
}
