//! Add/edit task form.
//!
//! The store is only called on an explicit submit. Validation failures and
//! store rejections keep the form open with an inline message; closing the
//! form throws the draft away.

use chrono::NaiveDate;

use crate::datetime::{
  DueDate,
  day_key
};
use crate::error::{
  CalendarError,
  CalendarResult,
  ValidationError
};
use crate::store::TaskStore;
use crate::task::{
  NewTask,
  Task,
  TaskPatch,
  TaskPriority,
  TaskStatus
};

#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct TaskForm {
  pub draft_title:       String,
  pub draft_description: String,
  pub draft_due:         String,
  pub draft_priority:
    Option<TaskPriority>,
  pub draft_status:
    Option<TaskStatus>,
  pub draft_assignee:    String
}

impl TaskForm {
  /// Blank form with the due date prefilled, as when clicking a day cell.
  pub fn for_day(
    day: NaiveDate
  ) -> Self {
    Self {
      draft_due: day_key(day),
      ..Self::default()
    }
  }

  pub fn from_task(
    task: &Task
  ) -> Self {
    Self {
      draft_title:       task
        .title
        .clone(),
      draft_description: task
        .description
        .clone()
        .unwrap_or_default(),
      draft_due:         task
        .due_date
        .clone()
        .unwrap_or_default(),
      draft_priority:    task.priority,
      draft_status:      Some(
        task.status.clone()
      ),
      draft_assignee:    task
        .assigned_to
        .clone()
        .unwrap_or_default()
    }
  }

  /// Title must be non-blank; the due date must be present and parse.
  pub fn validate(
    &self
  ) -> Result<(), ValidationError> {
    if self.draft_title.trim().is_empty()
    {
      return Err(
        ValidationError::MissingTitle
      );
    }

    let due = self.draft_due.trim();
    if due.is_empty() {
      return Err(
        ValidationError::MissingDueDate
      );
    }
    if DueDate::parse(due).is_err() {
      return Err(
        ValidationError::InvalidDueDate(
          due.to_string()
        )
      );
    }

    Ok(())
  }

  fn to_new_task(&self) -> NewTask {
    NewTask {
      title:       self
        .draft_title
        .trim()
        .to_string(),
      description: optional_text(
        &self.draft_description
      ),
      due_date:    optional_text(
        &self.draft_due
      ),
      priority:    self.draft_priority,
      status:      self
        .draft_status
        .clone()
        .unwrap_or(TaskStatus::Todo),
      assigned_to: optional_text(
        &self.draft_assignee
      )
    }
  }

  fn to_patch(&self) -> TaskPatch {
    TaskPatch {
      title:       Some(
        self
          .draft_title
          .trim()
          .to_string()
      ),
      description: Some(optional_text(
        &self.draft_description
      )),
      due_date:    Some(optional_text(
        &self.draft_due
      )),
      priority:    Some(
        self.draft_priority
      ),
      status:      self
        .draft_status
        .clone(),
      assigned_to: Some(optional_text(
        &self.draft_assignee
      ))
    }
  }
}

fn optional_text(
  raw: &str
) -> Option<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    None
  } else {
    Some(trimmed.to_string())
  }
}

/// Validates `form` and calls create (no `editing_id`) or update.
#[tracing::instrument(skip(store, form), fields(editing = editing_id.is_some()))]
pub async fn create_or_update_task<
  S: TaskStore
>(
  store: &S,
  form: &TaskForm,
  editing_id: Option<&str>
) -> CalendarResult<Task> {
  if let Err(err) = form.validate() {
    tracing::debug!(error = %err, "task form rejected");
    return Err(err.into());
  }

  match editing_id {
    | None => {
      store
        .create(form.to_new_task())
        .await
        .map_err(|err| {
          tracing::error!(error = %err, "task create failed");
          CalendarError::mutation(
            "create", &err
          )
        })
    }
    | Some(id) => {
      store
        .update(id, form.to_patch())
        .await
        .map_err(|err| {
          tracing::error!(task_id = %id, error = %err, "task update failed");
          CalendarError::mutation(
            "update", &err
          )
        })
    }
  }
}

#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub enum EditorMode {
  #[default]
  Closed,
  Add,
  Edit(String)
}

#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct TaskEditor {
  mode:  EditorMode,
  form:  TaskForm,
  error: Option<String>
}

impl TaskEditor {
  pub fn open_new(
    &mut self,
    day: Option<NaiveDate>
  ) {
    self.mode = EditorMode::Add;
    self.form = day
      .map(TaskForm::for_day)
      .unwrap_or_default();
    self.error = None;
  }

  pub fn open_edit(
    &mut self,
    task: &Task
  ) {
    self.mode =
      EditorMode::Edit(task.id.clone());
    self.form = TaskForm::from_task(task);
    self.error = None;
  }

  /// Discards the draft. Nothing is written.
  pub fn close(&mut self) {
    *self = Self::default();
  }

  pub fn is_open(&self) -> bool {
    self.mode != EditorMode::Closed
  }

  pub fn mode(&self) -> &EditorMode {
    &self.mode
  }

  pub fn form(&self) -> &TaskForm {
    &self.form
  }

  /// Editing a field clears the inline message.
  pub fn form_mut(
    &mut self
  ) -> &mut TaskForm {
    self.error = None;
    &mut self.form
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  /// Submits the draft. On success the editor closes; on failure it stays
  /// open and carries the inline message.
  pub async fn submit<S: TaskStore>(
    &mut self,
    store: &S
  ) -> CalendarResult<Task> {
    let editing_id = match &self.mode {
      | EditorMode::Closed => {
        return Err(
          ValidationError::FormClosed
            .into()
        );
      }
      | EditorMode::Add => None,
      | EditorMode::Edit(id) => {
        Some(id.clone())
      }
    };

    match create_or_update_task(
      store,
      &self.form,
      editing_id.as_deref()
    )
    .await
    {
      | Ok(task) => {
        self.close();
        Ok(task)
      }
      | Err(err) => {
        self.error =
          Some(err.user_message());
        Err(err)
      }
    }
  }
}
