use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::notify::{CooldownMap, NotificationInbox};
use crate::store::{TaskStore, task_from_new};
use crate::task::{NewTask, Task, TaskPatch};

/// File-backed task store: one JSON task per line in `tasks.jsonl`.
///
/// Reminder cool-downs live beside it in `cooldowns.json` and the reminder
/// inbox in `inbox.json`, so repeated CLI runs share them.
#[derive(Debug)]
pub struct JsonlTaskStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub cooldowns_path: PathBuf,
    pub inbox_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlTaskStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.jsonl");
        let cooldowns_path = data_dir.join("cooldowns.json");
        let inbox_path = data_dir.join("inbox.json");

        if !tasks_path.exists() {
            fs::write(&tasks_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            cooldowns = %cooldowns_path.display(),
            inbox = %inbox_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            cooldowns_path,
            inbox_path,
            write_lock: Mutex::new(()),
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.jsonl")
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, tasks).context("failed to save tasks.jsonl")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_cooldowns(&self) -> anyhow::Result<CooldownMap> {
        load_json_or_default(&self.cooldowns_path)
    }

    #[tracing::instrument(skip(self, cooldowns), fields(count = cooldowns.len()))]
    pub fn save_cooldowns(&self, cooldowns: &CooldownMap) -> anyhow::Result<()> {
        save_json_atomic(&self.cooldowns_path, cooldowns).context("failed to save cooldowns.json")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_inbox(&self) -> anyhow::Result<NotificationInbox> {
        load_json_or_default(&self.inbox_path)
    }

    #[tracing::instrument(skip(self, inbox), fields(count = inbox.len()))]
    pub fn save_inbox(&self, inbox: &NotificationInbox) -> anyhow::Result<()> {
        save_json_atomic(&self.inbox_path, inbox).context("failed to save inbox.json")
    }
}

impl TaskStore for JsonlTaskStore {
    async fn list(&self) -> anyhow::Result<Vec<Task>> {
        self.load_tasks()
    }

    #[tracing::instrument(skip(self, new), fields(title_len = new.title.len()))]
    async fn create(&self, new: NewTask) -> anyhow::Result<Task> {
        let _guard = self.write_lock.lock();
        let mut tasks = self.load_tasks()?;
        let task = task_from_new(Uuid::new_v4().to_string(), new);
        tasks.push(task.clone());
        self.save_tasks(&tasks)?;
        info!(id = %task.id, "task created");
        Ok(task)
    }

    #[tracing::instrument(skip(self, patch))]
    async fn update(&self, id: &str, patch: TaskPatch) -> anyhow::Result<Task> {
        let _guard = self.write_lock.lock();
        let mut tasks = self.load_tasks()?;

        let updated = {
            let task = tasks
                .iter_mut()
                .find(|task| task.id == id)
                .ok_or_else(|| anyhow!("task not found: {id}"))?;
            patch.apply_to(task);
            task.clone()
        };

        self.save_tasks(&tasks)?;
        info!(id = %updated.id, "task updated");
        Ok(updated)
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");
    write_atomic(path, |file| {
        for record in records {
            let serialized = serde_json::to_string(record)?;
            writeln!(file, "{serialized}")?;
        }
        Ok(())
    })
}

/// A missing or blank file reads as the default value.
fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    write_atomic(path, |file| {
        writeln!(file, "{payload}")?;
        Ok(())
    })
}

fn write_atomic<F>(path: &Path, write: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut NamedTempFile) -> anyhow::Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    write(&mut temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
