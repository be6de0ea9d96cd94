use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NexaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Started,
    Completed,
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Error)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Queued => "QUEUED",
            TaskState::Started => "STARTED",
            TaskState::Completed => "COMPLETED",
            TaskState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskState {
    type Err = NexaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(TaskState::Queued),
            "STARTED" => Ok(TaskState::Started),
            "COMPLETED" => Ok(TaskState::Completed),
            "ERROR" => Ok(TaskState::Error),
            other => Err(NexaError::invalid_argument(format!("unknown task state '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOperation {
    CreateCluster,
    ResizeCluster,
    DeleteCluster,
}

/// One entry of a Task's ordered step log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStep {
    pub sequence: u32,
    pub name: String,
    pub state: TaskState,
    pub attempts: u32,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub entity_id: String,
    pub entity_kind: String,
    pub operation: TaskOperation,
    pub state: TaskState,
    pub steps: Vec<TaskStep>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Absolute link to this task, filled in at the API boundary
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub self_link: Option<String>,
}

/// One page of an ordered listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_page_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous_page_link: Option<String>,
}

impl<T> ResourceList<T> {
    pub fn new(items: Vec<T>, next_page_link: Option<String>, previous_page_link: Option<String>) -> Self {
        Self { items, next_page_link, previous_page_link }
    }

    /// Rewrite the page links, e.g. from bare cursor tokens into API links.
    pub fn map_links(self, f: impl Fn(String) -> String) -> Self {
        Self {
            items: self.items,
            next_page_link: self.next_page_link.map(&f),
            previous_page_link: self.previous_page_link.map(&f),
        }
    }
}
