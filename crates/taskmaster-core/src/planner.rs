use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};

use crate::calendar::{
    CalendarView, CalendarViewMode, DayCell, DayGroups, NavDirection, PeriodStats, group_by_day,
};
use crate::datetime::{DueDate, parse_day_key};
use crate::editor::TaskEditor;
use crate::error::{CalendarError, CalendarResult};
use crate::notify::{CooldownMap, DeadlineNotifier, Notification, NotificationInbox};
use crate::store::TaskStore;
use crate::task::{Task, TaskPatch};

/// Host-side state tying the calendar, the form and the reminder bell to one
/// task list.
///
/// The list only changes through [`Planner::replace_tasks`] or after the
/// store confirms a mutation; every change re-runs the deadline scan.
#[derive(Debug, Clone)]
pub struct Planner {
    tasks: Vec<Task>,
    view: CalendarView,
    editor: TaskEditor,
    dragging: Option<String>,
    inbox: NotificationInbox,
    cooldowns: CooldownMap,
    notifier: DeadlineNotifier,
    timezone: Tz,
}

impl Planner {
    pub fn new(view: CalendarView, notifier: DeadlineNotifier, timezone: Tz) -> Self {
        Self {
            tasks: Vec::new(),
            view,
            editor: TaskEditor::default(),
            dragging: None,
            inbox: NotificationInbox::default(),
            cooldowns: CooldownMap::new(),
            notifier,
            timezone,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn timezone(&self) -> &Tz {
        &self.timezone
    }

    pub fn view(&self) -> &CalendarView {
        &self.view
    }

    pub fn navigate(&mut self, direction: NavDirection) {
        self.view = self.view.navigate(direction);
        debug!(anchor = %self.view.anchor, "calendar navigated");
    }

    pub fn jump_to(&mut self, day: NaiveDate) {
        self.view = self.view.today(day);
    }

    pub fn set_mode(&mut self, mode: CalendarViewMode) {
        self.view = self.view.with_mode(mode);
    }

    pub fn groups(&self) -> DayGroups<'_> {
        group_by_day(&self.tasks, &self.timezone)
    }

    pub fn cells(&self, today: NaiveDate) -> Vec<DayCell> {
        self.view.cells(&self.groups(), today)
    }

    pub fn summary(&self) -> PeriodStats {
        self.view.summarize(&self.groups())
    }

    pub fn tasks_for_key(&self, key: &str) -> Vec<&Task> {
        self.groups().tasks_for_key(key).to_vec()
    }

    pub fn inbox(&self) -> &NotificationInbox {
        &self.inbox
    }

    /// Marks every reminder seen and returns them.
    pub fn open_inbox(&mut self) -> &[Notification] {
        self.inbox.open()
    }

    /// Replaces the inbox with one kept from an earlier run.
    pub fn restore_inbox(&mut self, inbox: NotificationInbox) {
        self.inbox = inbox;
    }

    pub fn cooldowns(&self) -> &CooldownMap {
        &self.cooldowns
    }

    pub fn restore_cooldowns(&mut self, cooldowns: CooldownMap) {
        self.cooldowns = cooldowns;
    }

    pub fn editor(&self) -> &TaskEditor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut TaskEditor {
        &mut self.editor
    }

    /// Installs a fresh list and runs the deadline scan. Returns the batch
    /// that was appended to the inbox.
    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub fn replace_tasks(&mut self, tasks: Vec<Task>, now: DateTime<Utc>) -> Vec<Notification> {
        self.tasks = tasks;
        self.rescan(now)
    }

    #[instrument(skip(self, store))]
    pub async fn reload<S: TaskStore>(
        &mut self,
        store: &S,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Notification>> {
        let tasks = store.list().await?;
        Ok(self.replace_tasks(tasks, now))
    }

    fn rescan(&mut self, now: DateTime<Utc>) -> Vec<Notification> {
        let outcome = self.notifier.scan(&self.tasks, &self.cooldowns, now);
        self.cooldowns = outcome.cooldowns;
        self.inbox.append(outcome.notifications.clone());
        outcome.notifications
    }

    fn apply_confirmed(&mut self, task: Task, now: DateTime<Utc>) {
        match self.tasks.iter_mut().find(|existing| existing.id == task.id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
        self.rescan(now);
    }

    pub fn begin_drag(&mut self, task_id: &str) {
        debug!(task_id, "drag started");
        self.dragging = Some(task_id.to_string());
    }

    /// Dropped outside any day cell. Nothing is written.
    pub fn cancel_drag(&mut self) {
        if let Some(task_id) = self.dragging.take() {
            debug!(task_id = %task_id, "drag cancelled");
        }
    }

    pub fn dragging(&self) -> Option<&str> {
        self.dragging.as_deref()
    }

    /// Completes a drag on the cell keyed `day_key`.
    ///
    /// A drop with no drag in flight, on a key that does not parse, or on the
    /// day the task is already due is discarded and returns `Ok(None)`.
    pub async fn drop_on<S: TaskStore>(
        &mut self,
        store: &S,
        day_key: &str,
        now: DateTime<Utc>,
    ) -> CalendarResult<Option<Task>> {
        let Some(task_id) = self.dragging.take() else {
            return Ok(None);
        };

        let Ok(target) = parse_day_key(day_key) else {
            warn!(task_id = %task_id, day_key, "drop on invalid target discarded");
            return Ok(None);
        };

        let current_day = self
            .tasks
            .iter()
            .find(|task| task.id == task_id)
            .and_then(|task| task.due_date.as_deref())
            .and_then(|raw| DueDate::parse(raw).ok())
            .map(|due| due.day(&self.timezone));
        if current_day == Some(target) {
            debug!(task_id = %task_id, "dropped on its own day");
            return Ok(None);
        }

        self.move_task(store, &task_id, day_key, now).await.map(Some)
    }

    /// Reschedules `task_id` to `day_key` through the store. The local list
    /// reflects the move only once the store returns the updated record.
    #[instrument(skip(self, store, now))]
    pub async fn move_task<S: TaskStore>(
        &mut self,
        store: &S,
        task_id: &str,
        day_key: &str,
        now: DateTime<Utc>,
    ) -> CalendarResult<Task> {
        let target = parse_day_key(day_key)?;
        let key = crate::datetime::day_key(target);

        let updated = store
            .update(task_id, TaskPatch::reschedule(key))
            .await
            .map_err(|err| {
                warn!(task_id, error = %err, "reschedule rejected by store");
                CalendarError::mutation("reschedule", &err)
            })?;

        info!(task_id, due = ?updated.due_date, "task rescheduled");
        self.apply_confirmed(updated.clone(), now);
        Ok(updated)
    }

    /// Submits the open form and folds the stored record into the list.
    pub async fn submit_editor<S: TaskStore>(
        &mut self,
        store: &S,
        now: DateTime<Utc>,
    ) -> CalendarResult<Task> {
        let task = self.editor.submit(store).await?;
        self.apply_confirmed(task.clone(), now);
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc, Weekday};
    use parking_lot::Mutex;

    use super::*;
    use crate::notify::NotificationPolicy;
    use crate::store::MemoryTaskStore;
    use crate::task::NewTask;

    /// Records update calls and rejects them all.
    #[derive(Default)]
    struct RejectingStore {
        updates: Mutex<Vec<(String, TaskPatch)>>,
    }

    impl TaskStore for RejectingStore {
        async fn list(&self) -> anyhow::Result<Vec<Task>> {
            Ok(Vec::new())
        }

        async fn create(&self, _task: NewTask) -> anyhow::Result<Task> {
            Err(anyhow::anyhow!("backend offline"))
        }

        async fn update(&self, id: &str, patch: TaskPatch) -> anyhow::Result<Task> {
            self.updates.lock().push((id.to_string(), patch));
            Err(anyhow::anyhow!("backend offline"))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 9, 10, 0, 0)
            .single()
            .expect("valid now")
    }

    fn planner() -> Planner {
        let view = CalendarView::new(
            CalendarViewMode::Month,
            NaiveDate::from_ymd_opt(2024, 6, 9).expect("valid date"),
            Weekday::Sun,
        );
        Planner::new(
            view,
            DeadlineNotifier::new(NotificationPolicy::default(), chrono_tz::UTC),
            chrono_tz::UTC,
        )
    }

    fn report() -> Task {
        Task::new_todo("t-1", "Write report").with_due("2024-06-10")
    }

    #[tokio::test]
    async fn dragging_calls_store_with_new_day_key() {
        let store = MemoryTaskStore::with_tasks(vec![report()]);
        let mut planner = planner();
        planner.reload(&store, now()).await.expect("reload");

        planner.begin_drag("t-1");
        let moved = planner
            .drop_on(&store, "2024-06-12", now())
            .await
            .expect("drop")
            .expect("task moved");

        assert_eq!(moved.due_date.as_deref(), Some("2024-06-12"));
        assert!(planner.tasks_for_key("2024-06-10").is_empty());
        assert_eq!(planner.tasks_for_key("2024-06-12").len(), 1);
        assert_eq!(planner.dragging(), None);
    }

    #[tokio::test]
    async fn rejected_move_leaves_list_untouched() {
        let store = RejectingStore::default();
        let mut planner = planner();
        planner.replace_tasks(vec![report()], now());

        let err = planner
            .move_task(&store, "t-1", "2024-06-12", now())
            .await
            .expect_err("store rejects");
        assert!(matches!(err, CalendarError::MutationFailure { .. }));

        let updates = store.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "t-1");
        assert_eq!(updates[0].1, TaskPatch::reschedule("2024-06-12"));
        assert_eq!(planner.tasks()[0].due_date.as_deref(), Some("2024-06-10"));
    }

    #[tokio::test]
    async fn invalid_or_cancelled_drops_do_not_touch_the_store() {
        let store = RejectingStore::default();
        let mut planner = planner();
        planner.replace_tasks(vec![report()], now());

        planner.begin_drag("t-1");
        planner.cancel_drag();
        assert_eq!(planner.drop_on(&store, "2024-06-12", now()).await.expect("no drag"), None);

        planner.begin_drag("t-1");
        assert_eq!(planner.drop_on(&store, "trash", now()).await.expect("bad target"), None);

        planner.begin_drag("t-1");
        assert_eq!(planner.drop_on(&store, "2024-06-10", now()).await.expect("same day"), None);

        assert!(store.updates.lock().is_empty());
    }

    #[tokio::test]
    async fn list_changes_feed_the_inbox_once_per_cooldown() {
        let mut planner = planner();
        let first = planner.replace_tasks(vec![report()], now());
        assert_eq!(first.len(), 1);
        assert!(planner.inbox().has_unseen());

        let again = planner.replace_tasks(vec![report()], now() + chrono::Duration::minutes(5));
        assert!(again.is_empty());
        assert_eq!(planner.inbox().len(), 1);

        planner.open_inbox();
        assert!(!planner.inbox().has_unseen());
        assert!(planner.cooldowns().contains_key("t-1"));
    }

    #[tokio::test]
    async fn submitting_the_editor_adds_the_confirmed_task() {
        let store = MemoryTaskStore::new();
        let mut planner = planner();
        planner
            .editor_mut()
            .open_new(NaiveDate::from_ymd_opt(2024, 6, 10));
        planner.editor_mut().form_mut().draft_title = "Write report".to_string();

        let task = planner.submit_editor(&store, now()).await.expect("submit");
        assert!(!planner.editor().is_open());
        assert_eq!(planner.tasks_for_key("2024-06-10")[0].id, task.id);
        assert_eq!(planner.inbox().len(), 1);
    }

    #[test]
    fn navigation_updates_the_anchor() {
        let mut planner = planner();
        planner.navigate(NavDirection::Next);
        assert_eq!(
            planner.view().anchor,
            NaiveDate::from_ymd_opt(2024, 7, 9).expect("valid date")
        );
        planner.set_mode(CalendarViewMode::Week);
        planner.navigate(NavDirection::Previous);
        assert_eq!(
            planner.view().anchor,
            NaiveDate::from_ymd_opt(2024, 7, 2).expect("valid date")
        );
        assert_eq!(planner.cells(planner.view().anchor).len(), 7);
    }
}
