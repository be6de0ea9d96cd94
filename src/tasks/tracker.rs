use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pagination::{CursorStore, PageCursor};
use super::EntityStore;
use crate::config::PaginationConfig;
use crate::error::{NexaError, Result};
use crate::types::{ResourceList, Task, TaskOperation, TaskState, TaskStep};

pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Owner of every Task record. Only the tracker mutates task state, and a task
/// that reached COMPLETED or ERROR never changes again.
pub struct TaskTracker {
    tasks: DashMap<String, Task>,
    /// Task ids per entity in creation order. Append-only.
    by_entity: DashMap<String, Vec<String>>,
    cursors: CursorStore,
    pagination: PaginationConfig,
    entities: Arc<dyn EntityStore>,
}

impl TaskTracker {
    pub fn new(pagination: PaginationConfig, entities: Arc<dyn EntityStore>) -> Self {
        Self {
            tasks: DashMap::new(),
            by_entity: DashMap::new(),
            cursors: CursorStore::new(pagination.cursor_ttl()),
            pagination,
            entities,
        }
    }

    pub fn pagination(&self) -> &PaginationConfig {
        &self.pagination
    }

    pub fn create_task(&self, entity_id: &str, entity_kind: &str, operation: TaskOperation) -> Task {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.to_string(),
            entity_kind: entity_kind.to_string(),
            operation,
            state: TaskState::Queued,
            steps: Vec::new(),
            error: None,
            created_at: Utc::now(),
            finished_at: None,
            self_link: None,
        };

        self.tasks.insert(task.id.clone(), task.clone());
        self.by_entity
            .entry(entity_id.to_string())
            .or_default()
            .push(task.id.clone());
        debug!("Created task {} ({:?}) for {} {}", task.id, operation, entity_kind, entity_id);
        task
    }

    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .get(task_id)
            .map(|t| t.clone())
            .ok_or_else(|| NexaError::NotFound(format!("task {}", task_id)))
    }

    pub fn start(&self, task_id: &str) -> Result<()> {
        self.update(task_id, |task| {
            task.state = TaskState::Started;
        })?;
        info!("Task {} started", task_id);
        Ok(())
    }

    /// Open a new step in STARTED state and return its sequence number.
    pub fn append_step(&self, task_id: &str, name: &str) -> Result<u32> {
        self.update(task_id, |task| {
            let sequence = task.steps.len() as u32 + 1;
            task.steps.push(TaskStep {
                sequence,
                name: name.to_string(),
                state: TaskState::Started,
                attempts: 0,
                message: None,
                started_at: Utc::now(),
                finished_at: None,
            });
            sequence
        })
    }

    pub fn update_step(
        &self,
        task_id: &str,
        sequence: u32,
        state: TaskState,
        attempts: u32,
        message: Option<String>,
    ) -> Result<()> {
        self.update(task_id, |task| -> Result<()> {
            let step = task
                .steps
                .iter_mut()
                .find(|s| s.sequence == sequence)
                .ok_or_else(|| NexaError::NotFound(format!("step {} of task {}", sequence, task_id)))?;
            step.state = state;
            step.attempts = attempts;
            step.message = message;
            if state.is_terminal() {
                step.finished_at = Some(Utc::now());
            }
            Ok(())
        })?
    }

    pub fn complete(&self, task_id: &str) -> Result<()> {
        self.update(task_id, |task| {
            task.state = TaskState::Completed;
            task.finished_at = Some(Utc::now());
        })?;
        info!("Task {} completed", task_id);
        Ok(())
    }

    pub fn fail(&self, task_id: &str, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.update(task_id, |task| {
            task.state = TaskState::Error;
            task.error = Some(message.clone());
            task.finished_at = Some(Utc::now());
        })?;
        warn!("Task {} failed: {}", task_id, message);
        Ok(())
    }

    /// Force a task to ERROR "cancelled", closing any step still running.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        self.update(task_id, |task| {
            let now = Utc::now();
            for step in task.steps.iter_mut().filter(|s| !s.state.is_terminal()) {
                step.state = TaskState::Error;
                step.message = Some(CANCELLED_MESSAGE.to_string());
                step.finished_at = Some(now);
            }
            task.state = TaskState::Error;
            task.error = Some(CANCELLED_MESSAGE.to_string());
            task.finished_at = Some(now);
        })?;
        info!("Task {} cancelled", task_id);
        Ok(())
    }

    /// First page of an entity's tasks, oldest first.
    pub fn list(
        &self,
        entity_id: &str,
        state_filter: Option<TaskState>,
        page_size: Option<usize>,
    ) -> Result<ResourceList<Task>> {
        let page_size = self.pagination.resolve_page_size(page_size)?;
        if !self.entities.contains(entity_id) {
            return Err(NexaError::NotFound(format!("entity {}", entity_id)));
        }

        let ids = self
            .by_entity
            .get(entity_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let snapshot = match state_filter {
            None => ids,
            Some(state) => ids
                .into_iter()
                .filter(|id| self.tasks.get(id).is_some_and(|t| t.state == state))
                .collect(),
        };

        let cursor = self.cursors.open(snapshot, entity_id, state_filter, page_size);
        Ok(self.render(&cursor))
    }

    /// Resume a listing from a page link token.
    pub fn get_page(&self, token: &str) -> Result<ResourceList<Task>> {
        let cursor = self.cursors.resolve(token)?;
        Ok(self.render(&cursor))
    }

    /// Like `get_page`, but the link must have been issued for `entity_id`'s
    /// listing. A link from another entity is treated as unknown.
    pub fn get_page_for(&self, entity_id: &str, token: &str) -> Result<ResourceList<Task>> {
        let cursor = self.cursors.resolve(token)?;
        if cursor.entity_id != entity_id {
            debug!(
                "Page link for {} presented on {}'s listing",
                cursor.entity_id, entity_id
            );
            return Err(NexaError::PageExpired(token.to_string()));
        }
        Ok(self.render(&cursor))
    }

    pub fn purge_expired(&self) -> usize {
        let purged = self.cursors.purge_expired();
        if purged > 0 {
            debug!("Purged {} expired page cursors", purged);
        }
        purged
    }

    fn render(&self, cursor: &PageCursor) -> ResourceList<Task> {
        let items = cursor
            .window()
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| t.clone()))
            .collect();
        let next = cursor.next().map(|c| self.cursors.issue(c));
        let previous = cursor.previous().map(|c| self.cursors.issue(c));
        ResourceList::new(items, next, previous)
    }

    fn update<R>(&self, task_id: &str, f: impl FnOnce(&mut Task) -> R) -> Result<R> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| NexaError::NotFound(format!("task {}", task_id)))?;
        if task.state.is_terminal() {
            return Err(NexaError::InvalidState(format!(
                "task {} is already {}",
                task_id, task.state
            )));
        }
        Ok(f(&mut task))
    }
}
