use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};

use crate::calendar::{CalendarView, CalendarViewMode, NavDirection};
use crate::cli::Command;
use crate::config::Config;
use crate::datastore::JsonlTaskStore;
use crate::datetime::{day_key, parse_date_expr, parse_day_expr};
use crate::error::CalendarError;
use crate::notify::DeadlineNotifier;
use crate::planner::Planner;
use crate::render::{Renderer, print_notifications_json};
use crate::task::{TaskPriority, TaskStatus};

#[instrument(skip(store, cfg, renderer, command))]
pub async fn dispatch(
    store: &JsonlTaskStore,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let tz = cfg.timezone();
    let today = now.with_timezone(&tz).date_naive();
    let mut planner = Planner::new(
        CalendarView::new(cfg.default_mode(), today, cfg.week_start()),
        DeadlineNotifier::new(cfg.notification_policy(), tz),
        tz,
    );

    debug!(?command, timezone = %tz, "dispatching command");

    match command {
        Command::Calendar {
            mode,
            anchor,
            offset,
        } => {
            cmd_calendar(
                store,
                &mut planner,
                renderer,
                mode,
                anchor.as_deref(),
                offset,
                now,
            )
            .await
        }
        Command::Day { date } => cmd_day(store, &mut planner, renderer, &date, now).await,
        Command::Add {
            title,
            due,
            priority,
            assignee,
            description,
        } => {
            let fields = FormFields {
                title: Some(title),
                due: Some(due),
                priority,
                status: None,
                assignee,
                description,
            };
            cmd_add(store, &mut planner, renderer, fields, now).await
        }
        Command::Edit {
            id,
            title,
            due,
            priority,
            status,
            assignee,
            description,
        } => {
            let fields = FormFields {
                title,
                due,
                priority,
                status,
                assignee,
                description,
            };
            cmd_edit(store, &mut planner, renderer, &id, fields, now).await
        }
        Command::Move { id, day } => cmd_move(store, &mut planner, renderer, &id, &day, now).await,
        Command::Notify { now: at, json } => {
            cmd_notify(store, &mut planner, renderer, at.as_deref(), json, now).await
        }
        Command::Inbox { json } => cmd_inbox(store, &mut planner, renderer, json),
    }
}

/// Values given on the command line; `None` leaves the form field alone.
#[derive(Debug, Default)]
struct FormFields {
    title: Option<String>,
    due: Option<String>,
    priority: Option<TaskPriority>,
    status: Option<TaskStatus>,
    assignee: Option<String>,
    description: Option<String>,
}

impl FormFields {
    fn fill(self, planner: &mut Planner) {
        let form = planner.editor_mut().form_mut();
        if let Some(title) = self.title {
            form.draft_title = title;
        }
        if let Some(due) = self.due {
            form.draft_due = due;
        }
        if let Some(priority) = self.priority {
            form.draft_priority = Some(priority);
        }
        if let Some(status) = self.status {
            form.draft_status = Some(status);
        }
        if let Some(assignee) = self.assignee {
            form.draft_assignee = assignee;
        }
        if let Some(description) = self.description {
            form.draft_description = description;
        }
    }
}

fn surface(err: CalendarError) -> anyhow::Error {
    if err.is_validation() {
        return anyhow::Error::new(err);
    }
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

#[instrument(skip(store, planner, renderer, now))]
async fn cmd_calendar(
    store: &JsonlTaskStore,
    planner: &mut Planner,
    renderer: &Renderer,
    mode: Option<CalendarViewMode>,
    anchor: Option<&str>,
    offset: i32,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command calendar");
    let tz = *planner.timezone();
    let today = now.with_timezone(&tz).date_naive();

    if let Some(mode) = mode {
        planner.set_mode(mode);
    }
    if let Some(expr) = anchor {
        planner.jump_to(parse_day_expr(expr, now, &tz).context("invalid --anchor")?);
    }

    let direction = if offset < 0 {
        NavDirection::Previous
    } else {
        NavDirection::Next
    };
    for _ in 0..offset.unsigned_abs() {
        planner.navigate(direction);
    }

    planner.reload(store, now).await?;

    let skipped = planner.groups().skipped();
    if skipped > 0 {
        warn!(skipped, "tasks with unreadable due dates are not shown");
    }

    renderer.print_calendar(planner.view(), &planner.cells(today), planner.summary())
}

#[instrument(skip(store, planner, renderer, now))]
async fn cmd_day(
    store: &JsonlTaskStore,
    planner: &mut Planner,
    renderer: &Renderer,
    date: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command day");
    let tz = *planner.timezone();
    let day = parse_day_expr(date, now, &tz)?;

    planner.reload(store, now).await?;
    let key = day_key(day);
    renderer.print_day(&key, &planner.tasks_for_key(&key), &tz)
}

#[instrument(skip(store, planner, renderer, fields, now))]
async fn cmd_add(
    store: &JsonlTaskStore,
    planner: &mut Planner,
    renderer: &Renderer,
    fields: FormFields,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");

    planner.reload(store, now).await?;
    planner.editor_mut().open_new(None);
    fields.fill(planner);

    let task = planner.submit_editor(store, now).await.map_err(surface)?;
    println!("Created task {}.", task.id);
    renderer.print_task_info(&task, planner.timezone())
}

#[instrument(skip(store, planner, renderer, fields, now))]
async fn cmd_edit(
    store: &JsonlTaskStore,
    planner: &mut Planner,
    renderer: &Renderer,
    id: &str,
    fields: FormFields,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command edit");

    planner.reload(store, now).await?;
    let existing = planner
        .tasks()
        .iter()
        .find(|task| task.id == id)
        .cloned()
        .ok_or_else(|| anyhow!("task not found: {id}"))?;

    planner.editor_mut().open_edit(&existing);
    fields.fill(planner);

    let task = planner.submit_editor(store, now).await.map_err(surface)?;
    println!("Modified task {}.", task.id);
    renderer.print_task_info(&task, planner.timezone())
}

#[instrument(skip(store, planner, renderer, now))]
async fn cmd_move(
    store: &JsonlTaskStore,
    planner: &mut Planner,
    renderer: &Renderer,
    id: &str,
    day: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command move");
    let tz = *planner.timezone();
    let target: NaiveDate = parse_day_expr(day, now, &tz)?;
    let key = day_key(target);

    planner.reload(store, now).await?;
    if !planner.tasks().iter().any(|task| task.id == id) {
        return Err(anyhow!("task not found: {id}"));
    }

    planner.begin_drag(id);
    match planner.drop_on(store, &key, now).await.map_err(surface)? {
        Some(task) => {
            println!("Moved task {} to {key}.", task.id);
            renderer.print_task_info(&task, &tz)
        }
        None => {
            println!("Task {id} is already due on {key}.");
            Ok(())
        }
    }
}

#[instrument(skip(store, planner, renderer, now))]
async fn cmd_notify(
    store: &JsonlTaskStore,
    planner: &mut Planner,
    renderer: &Renderer,
    at: Option<&str>,
    json: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command notify");
    let tz: Tz = *planner.timezone();
    let scan_at = match at {
        Some(expr) => parse_date_expr(expr, now, &tz).context("invalid --now")?,
        None => now,
    };

    planner.restore_cooldowns(store.load_cooldowns()?);
    planner.restore_inbox(store.load_inbox()?);
    let batch = planner.reload(store, scan_at).await?;
    store.save_cooldowns(planner.cooldowns())?;
    store.save_inbox(planner.inbox())?;

    info!(count = batch.len(), "deadline scan finished");
    if json {
        print_notifications_json(&batch)
    } else {
        renderer.print_notifications(&batch, planner.inbox())
    }
}

#[instrument(skip(store, planner, renderer))]
fn cmd_inbox(
    store: &JsonlTaskStore,
    planner: &mut Planner,
    renderer: &Renderer,
    json: bool,
) -> anyhow::Result<()> {
    info!("command inbox");
    planner.restore_inbox(store.load_inbox()?);

    // Rendered before opening so unseen reminders can be marked.
    let listed = planner.inbox().notifications().to_vec();
    planner.open_inbox();
    store.save_inbox(planner.inbox())?;

    if json {
        print_notifications_json(&listed)
    } else {
        renderer.print_inbox(&listed, planner.timezone())
    }
}
