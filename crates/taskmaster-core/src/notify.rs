//! Due-soon reminders derived from the task list.
//!
//! A scan never mutates tasks or shared state: it takes the last-notified
//! map and returns the new batch together with the updated map. The host
//! merges the batch into the [`NotificationInbox`] it owns.

use std::collections::BTreeMap;

use chrono::{
  DateTime,
  Duration,
  Utc
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};

use crate::datetime::DueDate;
use crate::task::{
  Task,
  TaskPriority
};

/// Last reminder time per task id.
pub type CooldownMap =
  BTreeMap<String, DateTime<Utc>>;

pub const DEFAULT_LEAD_WINDOW_MINUTES:
  i64 = 48 * 60;
pub const DEFAULT_COOLDOWN_MINUTES:
  i64 = 3 * 60;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct NotificationPolicy {
  pub enabled:     bool,
  /// Remind once the deadline is at most this far away.
  pub lead_window: Duration,
  /// Minimum gap between two reminders for one task.
  pub cooldown:    Duration
}

impl Default for NotificationPolicy {
  fn default() -> Self {
    Self::from_minutes(
      DEFAULT_LEAD_WINDOW_MINUTES,
      DEFAULT_COOLDOWN_MINUTES
    )
  }
}

impl NotificationPolicy {
  /// Minutes beyond what `Duration` can hold fall back to the defaults.
  pub fn from_minutes(
    lead_window_minutes: i64,
    cooldown_minutes: i64
  ) -> Self {
    Self {
      enabled:     true,
      lead_window: minutes_or(
        lead_window_minutes,
        DEFAULT_LEAD_WINDOW_MINUTES
      ),
      cooldown:    minutes_or(
        cooldown_minutes,
        DEFAULT_COOLDOWN_MINUTES
      )
    }
  }
}

fn minutes_or(
  minutes: i64,
  fallback: i64
) -> Duration {
  Duration::try_minutes(minutes)
    .or_else(|| {
      tracing::warn!(
        minutes,
        "duration out of range; using default"
      );
      Duration::try_minutes(fallback)
    })
    .unwrap_or_else(Duration::zero)
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub id:         String,
  pub task_id:    String,
  pub title:      String,
  pub deadline:   String,
  pub priority:   Option<TaskPriority>,
  pub hours_left: f64,
  pub emitted_at: DateTime<Utc>,
  #[serde(default)]
  pub seen:       bool
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
  pub notifications: Vec<Notification>,
  pub cooldowns:     CooldownMap
}

#[derive(Debug, Clone)]
pub struct DeadlineNotifier {
  policy:   NotificationPolicy,
  timezone: Tz
}

impl DeadlineNotifier {
  pub fn new(
    policy: NotificationPolicy,
    timezone: Tz
  ) -> Self {
    Self { policy, timezone }
  }

  pub fn policy(
    &self
  ) -> &NotificationPolicy {
    &self.policy
  }

  /// One pass over the task list.
  ///
  /// Running it again with the returned map before the cool-down elapses
  /// yields an empty batch. Map entries whose cool-down already expired,
  /// or that lie in the future, are dropped and suppress nothing.
  #[tracing::instrument(skip_all, fields(tasks = tasks.len(), now = %now))]
  pub fn scan(
    &self,
    tasks: &[Task],
    cooldowns: &CooldownMap,
    now: DateTime<Utc>
  ) -> ScanOutcome {
    let mut next: CooldownMap =
      cooldowns
        .iter()
        .filter(|(_, last)| {
          let elapsed = now
            .signed_duration_since(**last);
          // Entries stamped after `now` came from a simulated clock.
          elapsed >= Duration::zero()
            && elapsed < self.policy.cooldown
        })
        .map(|(id, last)| {
          (id.clone(), *last)
        })
        .collect();

    if !self.policy.enabled {
      return ScanOutcome {
        notifications: Vec::new(),
        cooldowns:     next
      };
    }

    let mut notifications = Vec::new();
    for task in tasks {
      let Some(remaining) =
        self.time_left(task, now)
      else {
        continue;
      };

      if remaining <= Duration::zero()
        || remaining
          > self.policy.lead_window
      {
        continue;
      }

      if next.contains_key(&task.id) {
        tracing::debug!(
          task_id = %task.id,
          "reminder suppressed by cool-down"
        );
        continue;
      }

      let hours_left = remaining
        .num_milliseconds()
        as f64
        / 3_600_000.0;
      let notification = Notification {
        id: format!(
          "{}-{}",
          task.id,
          now.timestamp_millis()
        ),
        task_id: task.id.clone(),
        title: task.display_title(),
        deadline: task
          .due_date
          .clone()
          .unwrap_or_default(),
        priority: task.priority,
        hours_left,
        emitted_at: now,
        seen: false
      };
      tracing::info!(
        task_id = %task.id,
        hours_left,
        "emitting due-soon reminder"
      );
      next.insert(task.id.clone(), now);
      notifications.push(notification);
    }

    tracing::debug!(
      emitted = notifications.len(),
      tracked = next.len(),
      "deadline scan finished"
    );
    ScanOutcome {
      notifications,
      cooldowns: next
    }
  }

  /// Time until the task is due, or `None` when it is not a candidate.
  fn time_left(
    &self,
    task: &Task,
    now: DateTime<Utc>
  ) -> Option<Duration> {
    if task.status.is_completed() {
      return None;
    }

    let raw = task.due_date.as_deref()?;
    let deadline = DueDate::parse(raw)
      .and_then(|due| {
        due.deadline(&self.timezone)
      });
    match deadline {
      | Ok(deadline) => Some(
        deadline
          .signed_duration_since(now)
      ),
      | Err(err) => {
        tracing::warn!(
          task_id = %task.id,
          error = %err,
          "skipping task with malformed due date"
        );
        None
      }
    }
  }
}

/// Reminders shown by the bell, plus the unseen flag.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct NotificationInbox {
  #[serde(default)]
  notifications: Vec<Notification>,
  #[serde(default)]
  has_unseen:    bool
}

impl NotificationInbox {
  /// Appends one scan's batch. An empty batch leaves the flag alone.
  pub fn append(
    &mut self,
    batch: Vec<Notification>
  ) {
    if batch.is_empty() {
      return;
    }
    self.has_unseen = true;
    self.notifications.extend(batch);
  }

  /// Opening the list marks everything seen. Nothing is removed.
  pub fn open(
    &mut self
  ) -> &[Notification] {
    for notification in
      &mut self.notifications
    {
      notification.seen = true;
    }
    self.has_unseen = false;
    &self.notifications
  }

  pub fn has_unseen(&self) -> bool {
    self.has_unseen
  }

  pub fn unseen_count(&self) -> usize {
    self
      .notifications
      .iter()
      .filter(|notification| {
        !notification.seen
      })
      .count()
  }

  pub fn notifications(
    &self
  ) -> &[Notification] {
    &self.notifications
  }

  pub fn len(&self) -> usize {
    self.notifications.len()
  }

  pub fn is_empty(&self) -> bool {
    self.notifications.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::*;
  use crate::task::TaskStatus;

  fn at(
    y: i32,
    mo: u32,
    d: u32,
    h: u32,
    mi: u32
  ) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(y, mo, d, h, mi, 0)
      .single()
      .expect("valid instant")
  }

  fn notifier() -> DeadlineNotifier {
    DeadlineNotifier::new(
      NotificationPolicy::default(),
      chrono_tz::UTC
    )
  }

  fn due_task(
    id: &str,
    due: &str
  ) -> Task {
    Task::new_todo(id, format!("task {id}"))
      .with_due(due)
  }

  #[test]
  fn date_only_task_due_tomorrow_emits_once() {
    let task: Task = serde_json::from_str(
      r#"{"id":"r1","title":"Write report","dueDate":"2024-06-10","status":"TODO"}"#
    )
    .expect("parse task");
    let outcome = notifier().scan(
      &[task],
      &CooldownMap::new(),
      at(2024, 6, 9, 10, 0)
    );

    assert_eq!(
      outcome.notifications.len(),
      1
    );
    let notification =
      &outcome.notifications[0];
    assert_eq!(
      notification.deadline,
      "2024-06-10"
    );
    assert_eq!(
      notification.title,
      "Write report"
    );
    assert!(!notification.seen);
    assert!(
      (notification.hours_left - 37.983)
        .abs()
        < 0.01
    );
    assert_eq!(
      outcome.cooldowns.get("r1"),
      Some(&at(2024, 6, 9, 10, 0))
    );
  }

  #[test]
  fn window_boundaries_are_exclusive_of_zero_inclusive_of_limit()
  {
    let now = at(2024, 6, 1, 0, 0);
    let tasks = vec![
      due_task(
        "exact",
        "2024-06-03T00:00"
      ),
      due_task(
        "over",
        "2024-06-03T00:00:36"
      ),
      due_task("zero", "2024-06-01T00:00"),
      due_task("past", "2024-05-31")
    ];

    let outcome = notifier().scan(
      &tasks,
      &CooldownMap::new(),
      now
    );
    let ids = outcome
      .notifications
      .iter()
      .map(|n| n.task_id.as_str())
      .collect::<Vec<_>>();
    assert_eq!(ids, vec!["exact"]);
  }

  #[test]
  fn second_scan_inside_cooldown_is_silent() {
    let tasks =
      vec![due_task("a", "2024-06-02")];
    let first = notifier().scan(
      &tasks,
      &CooldownMap::new(),
      at(2024, 6, 1, 9, 0)
    );
    assert_eq!(first.notifications.len(), 1);

    let second = notifier().scan(
      &tasks,
      &first.cooldowns,
      at(2024, 6, 1, 11, 59)
    );
    assert!(second.notifications.is_empty());
    assert_eq!(
      second.cooldowns,
      first.cooldowns
    );

    let third = notifier().scan(
      &tasks,
      &second.cooldowns,
      at(2024, 6, 1, 12, 0)
    );
    assert_eq!(third.notifications.len(), 1);
  }

  #[test]
  fn future_stamped_cooldown_does_not_suppress() {
    let tasks =
      vec![due_task("a", "2024-06-02")];
    let mut cooldowns = CooldownMap::new();
    cooldowns.insert(
      "a".to_string(),
      at(2030, 1, 1, 0, 0)
    );

    let outcome = notifier().scan(
      &tasks,
      &cooldowns,
      at(2024, 6, 1, 9, 0)
    );
    assert_eq!(
      outcome.notifications.len(),
      1
    );
    assert_eq!(
      outcome.cooldowns.get("a"),
      Some(&at(2024, 6, 1, 9, 0))
    );
  }

  #[test]
  fn oversized_minutes_fall_back_to_defaults() {
    let policy =
      NotificationPolicy::from_minutes(
        i64::MAX,
        i64::MIN
      );
    assert_eq!(
      policy,
      NotificationPolicy::default()
    );
  }

  #[test]
  fn completed_undated_and_malformed_tasks_are_skipped()
  {
    let mut done =
      due_task("done", "2024-06-02");
    done.status = TaskStatus::Completed;
    let tasks = vec![
      done,
      Task::new_todo("undated", "x"),
      due_task("bad", "June 2nd")
    ];

    let outcome = notifier().scan(
      &tasks,
      &CooldownMap::new(),
      at(2024, 6, 1, 9, 0)
    );
    assert!(
      outcome.notifications.is_empty()
    );
    assert!(outcome.cooldowns.is_empty());
  }

  #[test]
  fn disabled_policy_emits_nothing() {
    let notifier = DeadlineNotifier::new(
      NotificationPolicy {
        enabled: false,
        ..NotificationPolicy::default()
      },
      chrono_tz::UTC
    );
    let outcome = notifier.scan(
      &[due_task("a", "2024-06-02")],
      &CooldownMap::new(),
      at(2024, 6, 1, 9, 0)
    );
    assert!(
      outcome.notifications.is_empty()
    );
  }

  #[test]
  fn custom_policy_narrows_the_window() {
    let notifier = DeadlineNotifier::new(
      NotificationPolicy::from_minutes(
        60, 30
      ),
      chrono_tz::UTC
    );
    let tasks = vec![
      due_task("soon", "2024-06-01T09:45"),
      due_task("later", "2024-06-01T11:00")
    ];
    let outcome = notifier.scan(
      &tasks,
      &CooldownMap::new(),
      at(2024, 6, 1, 9, 0)
    );
    assert_eq!(
      outcome.notifications.len(),
      1
    );
    assert_eq!(
      outcome.notifications[0].task_id,
      "soon"
    );
  }

  #[test]
  fn inbox_tracks_unseen_until_opened() {
    let mut inbox =
      NotificationInbox::default();
    inbox.append(Vec::new());
    assert!(!inbox.has_unseen());

    let outcome = notifier().scan(
      &[
        due_task("a", "2024-06-02"),
        due_task("b", "2024-06-02")
      ],
      &CooldownMap::new(),
      at(2024, 6, 1, 9, 0)
    );
    inbox.append(outcome.notifications);
    assert!(inbox.has_unseen());
    assert_eq!(inbox.unseen_count(), 2);

    let opened = inbox.open();
    assert_eq!(opened.len(), 2);
    assert!(opened.iter().all(|n| n.seen));
    assert!(!inbox.has_unseen());
    assert_eq!(inbox.len(), 2);
  }
}
