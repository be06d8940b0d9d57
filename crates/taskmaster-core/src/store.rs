use std::future::Future;

use anyhow::anyhow;
use parking_lot::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::task::{NewTask, Task, TaskPatch};

/// The task store that owns persistent task records.
///
/// Calls may fail; callers surface the failure and never retry.
pub trait TaskStore {
    fn list(&self) -> impl Future<Output = anyhow::Result<Vec<Task>>> + Send;

    fn create(&self, task: NewTask) -> impl Future<Output = anyhow::Result<Task>> + Send;

    fn update(
        &self,
        id: &str,
        patch: TaskPatch,
    ) -> impl Future<Output = anyhow::Result<Task>> + Send;
}

/// In-process store keyed by generated uuids.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
        }
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().clone()
    }
}

impl TaskStore for MemoryTaskStore {
    #[instrument(skip(self))]
    async fn list(&self) -> anyhow::Result<Vec<Task>> {
        Ok(self.snapshot())
    }

    #[instrument(skip(self, new), fields(title_len = new.title.len()))]
    async fn create(&self, new: NewTask) -> anyhow::Result<Task> {
        let task = task_from_new(Uuid::new_v4().to_string(), new);
        self.tasks.lock().push(task.clone());
        debug!(id = %task.id, "task created");
        Ok(task)
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, id: &str, patch: TaskPatch) -> anyhow::Result<Task> {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| anyhow!("task not found: {id}"))?;
        patch.apply_to(task);
        debug!(id = %task.id, "task patch applied");
        Ok(task.clone())
    }
}

pub(crate) fn task_from_new(id: String, new: NewTask) -> Task {
    Task {
        id,
        title: new.title,
        description: new.description,
        due_date: new.due_date,
        priority: new.priority,
        status: new.status,
        assigned_to: new.assigned_to,
    }
}
