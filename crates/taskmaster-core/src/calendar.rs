//! Calendar view model: visible windows, day grouping and render-ready cells.
//!
//! Everything here is a pure function of its inputs. The host owns the task
//! list and re-derives groupings whenever it changes.

use std::collections::BTreeMap;

use chrono::{
  Datelike,
  NaiveDate,
  Weekday
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};

use crate::datetime::{
  DueDate,
  add_days,
  day_key,
  end_of_week,
  first_day_of_month,
  last_day_of_month,
  parse_day_key,
  shift_months,
  start_of_week
};
use crate::task::{
  Task,
  TaskPriority,
  TaskStatus
};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Default,
)]
#[serde(rename_all = "lowercase")]
pub enum CalendarViewMode {
  #[default]
  Month,
  Week
}

impl CalendarViewMode {
  pub fn as_key(self) -> &'static str {
    match self {
      | CalendarViewMode::Month => {
        "month"
      }
      | CalendarViewMode::Week => "week"
    }
  }

  pub fn from_key(
    raw: &str
  ) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "month" => {
        Some(CalendarViewMode::Month)
      }
      | "week" => {
        Some(CalendarViewMode::Week)
      }
      | _ => None
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum NavDirection {
  Previous,
  Next
}

impl NavDirection {
  fn step(self) -> i64 {
    match self {
      | NavDirection::Previous => -1,
      | NavDirection::Next => 1
    }
  }
}

/// Every date shown by a grid, in order and without gaps.
///
/// Month mode widens the month outward to whole weeks, so the length is
/// always a multiple of seven. Week mode yields exactly seven days.
pub fn compute_visible_days(
  mode: CalendarViewMode,
  anchor: NaiveDate,
  week_start: Weekday
) -> Vec<NaiveDate> {
  let (start, end) = match mode {
    | CalendarViewMode::Month => {
      let first = first_day_of_month(
        anchor.year(),
        anchor.month()
      );
      let last = last_day_of_month(
        anchor.year(),
        anchor.month()
      );
      (
        start_of_week(
          first, week_start
        ),
        end_of_week(last, week_start)
      )
    }
    | CalendarViewMode::Week => {
      let start = start_of_week(
        anchor, week_start
      );
      (start, add_days(start, 6))
    }
  };

  start
    .iter_days()
    .take_while(|day| *day <= end)
    .collect()
}

/// Short weekday labels in grid order.
pub fn weekday_labels(
  week_start: Weekday
) -> Vec<&'static str> {
  let mut day = week_start;
  let mut labels =
    Vec::with_capacity(7);
  for _ in 0..7 {
    labels.push(weekday_label(day));
    day = day.succ();
  }
  labels
}

fn weekday_label(
  day: Weekday
) -> &'static str {
  match day {
    | Weekday::Mon => "Mon",
    | Weekday::Tue => "Tue",
    | Weekday::Wed => "Wed",
    | Weekday::Thu => "Thu",
    | Weekday::Fri => "Fri",
    | Weekday::Sat => "Sat",
    | Weekday::Sun => "Sun"
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct CalendarView {
  pub mode:       CalendarViewMode,
  pub anchor:     NaiveDate,
  pub week_start: Weekday
}

impl CalendarView {
  pub fn new(
    mode: CalendarViewMode,
    anchor: NaiveDate,
    week_start: Weekday
  ) -> Self {
    Self {
      mode,
      anchor,
      week_start
    }
  }

  pub fn visible_days(
    &self
  ) -> Vec<NaiveDate> {
    compute_visible_days(
      self.mode,
      self.anchor,
      self.week_start
    )
  }

  /// Visible days in rows of seven.
  pub fn weeks(
    &self
  ) -> Vec<Vec<NaiveDate>> {
    self
      .visible_days()
      .chunks(7)
      .map(<[NaiveDate]>::to_vec)
      .collect()
  }

  pub fn contains(
    &self,
    day: NaiveDate
  ) -> bool {
    let days = self.visible_days();
    match (days.first(), days.last()) {
      | (Some(first), Some(last)) => {
        day >= *first && day <= *last
      }
      | _ => false
    }
  }

  /// One month or one week forward/back.
  #[must_use]
  pub fn navigate(
    self,
    direction: NavDirection
  ) -> Self {
    let step = direction.step();
    let anchor = match self.mode {
      | CalendarViewMode::Month => {
        shift_months(
          self.anchor,
          step as i32
        )
      }
      | CalendarViewMode::Week => {
        add_days(self.anchor, step * 7)
      }
    };
    Self { anchor, ..self }
  }

  #[must_use]
  pub fn today(
    self,
    today: NaiveDate
  ) -> Self {
    Self {
      anchor: today,
      ..self
    }
  }

  #[must_use]
  pub fn with_mode(
    self,
    mode: CalendarViewMode
  ) -> Self {
    Self { mode, ..self }
  }

  pub fn title(&self) -> String {
    match self.mode {
      | CalendarViewMode::Month => {
        self
          .anchor
          .format("%B %Y")
          .to_string()
      }
      | CalendarViewMode::Week => {
        let start = start_of_week(
          self.anchor,
          self.week_start
        );
        format!(
          "Week {} - {}",
          day_key(start),
          day_key(add_days(start, 6))
        )
      }
    }
  }

  /// Render-ready cells for every visible day, empty days included.
  pub fn cells(
    &self,
    groups: &DayGroups<'_>,
    today: NaiveDate
  ) -> Vec<DayCell> {
    self
      .visible_days()
      .into_iter()
      .map(|date| {
        DayCell {
          date,
          key: day_key(date),
          outside_month: self.mode
            == CalendarViewMode::Month
            && date.month()
              != self.anchor.month(),
          is_today: date == today,
          tasks: groups
            .tasks_on(date)
            .iter()
            .map(|task| {
              TaskCard::from_task(
                task
              )
            })
            .collect()
        }
      })
      .collect()
  }

  pub fn summarize(
    &self,
    groups: &DayGroups<'_>
  ) -> PeriodStats {
    let mut stats =
      PeriodStats::default();
    for day in self.visible_days() {
      for task in groups.tasks_on(day)
      {
        stats.push(&task.status);
      }
    }
    stats
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct PeriodStats {
  pub total:       usize,
  pub open:        usize,
  pub in_progress: usize,
  pub completed:   usize
}

impl PeriodStats {
  fn push(
    &mut self,
    status: &TaskStatus
  ) {
    self.total += 1;
    match status {
      | TaskStatus::Completed => {
        self.completed += 1
      }
      | TaskStatus::InProgress => {
        self.in_progress += 1
      }
      | TaskStatus::Todo
      | TaskStatus::Other(_) => {
        self.open += 1
      }
    }
  }
}

#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
pub struct TaskCard {
  pub id:       String,
  pub title:    String,
  /// `None` means no badge, not a default priority.
  pub priority: Option<TaskPriority>,
  pub dimmed:   bool
}

impl TaskCard {
  pub fn from_task(
    task: &Task
  ) -> Self {
    Self {
      id:       task.id.clone(),
      title:    task.display_title(),
      priority: task.priority,
      dimmed:   task
        .status
        .is_completed()
    }
  }
}

#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
pub struct DayCell {
  pub date:          NaiveDate,
  pub key:           String,
  pub outside_month: bool,
  pub is_today:      bool,
  pub tasks:         Vec<TaskCard>
}

/// Tasks bucketed by the calendar day they are due on.
#[derive(Debug, Clone, Default)]
pub struct DayGroups<'a> {
  by_day:  BTreeMap<
    NaiveDate,
    Vec<&'a Task>
  >,
  skipped: usize
}

impl<'a> DayGroups<'a> {
  pub fn tasks_on(
    &self,
    day: NaiveDate
  ) -> &[&'a Task] {
    self
      .by_day
      .get(&day)
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  /// Lookup by `YYYY-MM-DD`. Unparseable keys have no tasks.
  pub fn tasks_for_key(
    &self,
    key: &str
  ) -> &[&'a Task] {
    match parse_day_key(key) {
      | Ok(day) => self.tasks_on(day),
      | Err(_) => &[]
    }
  }

  pub fn keys(
    &self
  ) -> impl Iterator<Item = String> + '_
  {
    self.by_day.keys().copied().map(day_key)
  }

  pub fn by_key(
    &self
  ) -> BTreeMap<String, Vec<&'a Task>>
  {
    self
      .by_day
      .iter()
      .map(|(day, tasks)| {
        (day_key(*day), tasks.clone())
      })
      .collect()
  }

  /// Number of distinct days with at least one task.
  pub fn len(&self) -> usize {
    self.by_day.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_day.is_empty()
  }

  /// Tasks left out because their due date did not parse.
  pub fn skipped(&self) -> usize {
    self.skipped
  }
}

/// Buckets `tasks` by due day in `tz`, keeping input order within a day.
///
/// Tasks without a due date are ignored; tasks whose due date does not
/// parse are logged and counted in [`DayGroups::skipped`].
#[tracing::instrument(skip_all, fields(tasks = tasks.len()))]
pub fn group_by_day<'a>(
  tasks: &'a [Task],
  tz: &Tz
) -> DayGroups<'a> {
  let mut groups = DayGroups::default();

  for task in tasks {
    let Some(raw_due) =
      task.due_date.as_deref()
    else {
      continue;
    };

    match DueDate::parse(raw_due) {
      | Ok(due) => {
        groups
          .by_day
          .entry(due.day(tz))
          .or_default()
          .push(task);
      }
      | Err(err) => {
        tracing::warn!(
          task_id = %task.id,
          error = %err,
          "skipping task with malformed due date"
        );
        groups.skipped += 1;
      }
    }
  }

  tracing::debug!(
    days = groups.by_day.len(),
    skipped = groups.skipped,
    timezone = %tz,
    "calendar tasks grouped"
  );
  groups
}
