use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::calendar::{CalendarView, DayCell, PeriodStats, TaskCard, weekday_labels};
use crate::config::Config;
use crate::datetime::DueDate;
use crate::notify::{Notification, NotificationInbox};
use crate::task::{Task, TaskPriority};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            color: cfg.settings.color && io::stdout().is_terminal(),
        }
    }

    /// Renderer that never emits escape codes.
    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(cells = cells.len()))]
    pub fn print_calendar(
        &self,
        view: &CalendarView,
        cells: &[DayCell],
        stats: PeriodStats,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_calendar(&mut out, view, cells, stats)
    }

    pub fn write_calendar<W: Write>(
        &self,
        mut out: W,
        view: &CalendarView,
        cells: &[DayCell],
        stats: PeriodStats,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&view.title(), "1"))?;
        writeln!(
            out,
            "{} tasks: {} open, {} in progress, {} completed",
            stats.total, stats.open, stats.in_progress, stats.completed
        )?;
        writeln!(out)?;

        let headers = weekday_labels(view.week_start)
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let rows = cells
            .chunks(7)
            .map(|week| week.iter().map(|cell| self.grid_cell(cell)).collect())
            .collect();
        write_table(&mut out, headers, rows)?;

        let busy = cells.iter().filter(|cell| !cell.tasks.is_empty());
        for cell in busy {
            writeln!(out)?;
            writeln!(
                out,
                "{} {}",
                self.paint(&cell.key, "36"),
                cell.date.format("%a")
            )?;
            for card in &cell.tasks {
                writeln!(out, "  {}", self.card_line(card))?;
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, tasks, tz), fields(count = tasks.len()))]
    pub fn print_day(&self, key: &str, tasks: &[&Task], tz: &Tz) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_day(&mut out, key, tasks, tz)
    }

    pub fn write_day<W: Write>(
        &self,
        mut out: W,
        key: &str,
        tasks: &[&Task],
        tz: &Tz,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "no tasks due on {key}")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Due".to_string(),
            "Pri".to_string(),
            "Status".to_string(),
            "Assignee".to_string(),
            "Title".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let due = task
                .due_date
                .as_deref()
                .and_then(|raw| DueDate::parse(raw).ok())
                .map(|due| format_due(&due, tz))
                .unwrap_or_default();
            let title = if task.status.is_completed() {
                self.paint(&task.display_title(), "2")
            } else {
                task.display_title()
            };

            rows.push(vec![
                self.paint(&task.id, "33"),
                due,
                task.priority
                    .map(|priority| self.badge(priority))
                    .unwrap_or_default(),
                task.status.label().to_string(),
                task.assigned_to.clone().unwrap_or_default(),
                title,
            ]);
        }

        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip_all, fields(batch = batch.len()))]
    pub fn print_notifications(
        &self,
        batch: &[Notification],
        inbox: &NotificationInbox,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_notifications(&mut out, batch, inbox)
    }

    pub fn write_notifications<W: Write>(
        &self,
        mut out: W,
        batch: &[Notification],
        inbox: &NotificationInbox,
    ) -> anyhow::Result<()> {
        if batch.is_empty() {
            writeln!(out, "no deadlines need a reminder right now")?;
        } else {
            let headers = vec![
                "Task".to_string(),
                "Deadline".to_string(),
                "Left".to_string(),
                "Pri".to_string(),
                "Title".to_string(),
            ];
            let rows = batch
                .iter()
                .map(|note| {
                    vec![
                        self.paint(&note.task_id, "33"),
                        note.deadline.clone(),
                        self.hours_left(note.hours_left),
                        note.priority
                            .map(|priority| self.badge(priority))
                            .unwrap_or_default(),
                        note.title.clone(),
                    ]
                })
                .collect();
            write_table(&mut out, headers, rows)?;
        }

        writeln!(
            out,
            "inbox: {} unseen of {}",
            inbox.unseen_count(),
            inbox.len()
        )?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(count = notifications.len()))]
    pub fn print_inbox(&self, notifications: &[Notification], tz: &Tz) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_inbox(&mut out, notifications, tz)
    }

    /// Lists kept reminders oldest first; unseen ones carry a `*`.
    pub fn write_inbox<W: Write>(
        &self,
        mut out: W,
        notifications: &[Notification],
        tz: &Tz,
    ) -> anyhow::Result<()> {
        if notifications.is_empty() {
            writeln!(out, "inbox is empty")?;
            return Ok(());
        }

        let headers = vec![
            "New".to_string(),
            "Emitted".to_string(),
            "Task".to_string(),
            "Deadline".to_string(),
            "Title".to_string(),
        ];
        let rows = notifications
            .iter()
            .map(|note| {
                let marker = if note.seen { "" } else { "*" };
                vec![
                    self.paint(marker, "1"),
                    format_instant(note.emitted_at, tz),
                    self.paint(&note.task_id, "33"),
                    note.deadline.clone(),
                    note.title.clone(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, task, tz))]
    pub fn print_task_info(&self, task: &Task, tz: &Tz) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "title     {}", task.display_title())?;
        writeln!(out, "status    {}", task.status.label())?;
        if let Some(priority) = task.priority {
            writeln!(out, "priority  {}", self.badge(priority))?;
        }
        if let Some(raw) = task.due_date.as_deref() {
            match DueDate::parse(raw) {
                Ok(due) => writeln!(out, "due       {}", format_due(&due, tz))?,
                Err(_) => writeln!(out, "due       {} (unreadable)", raw)?,
            }
        }
        if let Some(assignee) = task.assigned_to.as_deref() {
            writeln!(out, "assignee  {assignee}")?;
        }
        if let Some(description) = task.description.as_deref() {
            writeln!(out, "desc      {description}")?;
        }

        Ok(())
    }

    fn grid_cell(&self, cell: &DayCell) -> String {
        let mut text = format!("{:>2}", cell.date.day());
        if !cell.tasks.is_empty() {
            text.push_str(&format!(" ({})", cell.tasks.len()));
        }
        if cell.is_today {
            text = format!("[{text}]");
        }

        if cell.is_today {
            self.paint(&text, "7")
        } else if cell.outside_month {
            self.paint(&text, "2")
        } else {
            text
        }
    }

    fn card_line(&self, card: &TaskCard) -> String {
        let title = if card.dimmed {
            self.paint(&card.title, "2")
        } else {
            card.title.clone()
        };

        match card.priority {
            Some(priority) => format!("{} {title}  {}", self.badge(priority), card.id),
            None => format!("{title}  {}", card.id),
        }
    }

    fn badge(&self, priority: TaskPriority) -> String {
        let code = match priority {
            TaskPriority::High => "31",
            TaskPriority::Medium => "33",
            TaskPriority::Low => "32",
        };
        self.paint(priority.label(), code)
    }

    fn hours_left(&self, hours: f64) -> String {
        let text = format!("{hours:.1}h");
        if hours <= 24.0 {
            self.paint(&text, "31")
        } else {
            text
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Prints a notification batch as a JSON array.
pub fn print_notifications_json(batch: &[Notification]) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, batch)?;
    writeln!(out)?;
    Ok(())
}

pub fn format_instant(instant: DateTime<Utc>, tz: &Tz) -> String {
    instant.with_timezone(tz).format("%Y-%m-%d %H:%M").to_string()
}

fn format_due(due: &DueDate, tz: &Tz) -> String {
    match due {
        DueDate::Day(date) => date.format("%Y-%m-%d").to_string(),
        DueDate::Local(local) => local.format("%Y-%m-%d %H:%M").to_string(),
        DueDate::Instant(instant) => format_instant(*instant, tz),
    }
}


fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect::<Vec<_>>();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = row.get(idx).map(String::as_str).unwrap_or("");
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc, Weekday};

    use super::*;
    use crate::calendar::{CalendarViewMode, group_by_day};
    use crate::task::TaskStatus;

    fn render_to_string<F>(render: F) -> String
    where
        F: FnOnce(&mut Vec<u8>) -> anyhow::Result<()>,
    {
        let mut buf = Vec::new();
        render(&mut buf).expect("render");
        String::from_utf8(buf).expect("utf8 output")
    }

    #[test]
    fn table_pads_by_visible_width() {
        let rows = vec![
            vec!["\x1b[31mab\x1b[0m".to_string(), "x".to_string()],
            vec!["日本".to_string(), "y".to_string()],
        ];
        let text = render_to_string(|buf| {
            write_table(buf, vec!["A".to_string(), "B".to_string()], rows)
        });
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "A    B ");
        assert_eq!(lines[3], "日本 y ");
        assert_eq!(strip_ansi(lines[2]), "ab   x ");
    }

    #[test]
    fn week_calendar_lists_agenda_under_the_grid() {
        let tasks = vec![
            Task {
                priority: Some(TaskPriority::High),
                ..Task::new_todo("t-1", "Write report").with_due("2024-06-10")
            },
            Task {
                status: TaskStatus::Completed,
                ..Task::new_todo("t-2", "File expenses").with_due("2024-06-12T09:00")
            },
        ];
        let view = CalendarView::new(
            CalendarViewMode::Week,
            NaiveDate::from_ymd_opt(2024, 6, 10).expect("valid date"),
            Weekday::Mon,
        );
        let groups = group_by_day(&tasks, &Tz::UTC);
        let cells = view.cells(&groups, NaiveDate::from_ymd_opt(2024, 6, 11).expect("date"));
        let stats = view.summarize(&groups);

        let text = render_to_string(|buf| {
            Renderer::plain().write_calendar(buf, &view, &cells, stats)
        });

        assert!(text.starts_with("Week 2024-06-10 - 2024-06-16\n"));
        assert!(text.contains("2 tasks: 1 open, 0 in progress, 1 completed"));
        assert!(text.contains("10 (1)"));
        assert!(text.contains("[11]"));
        assert!(text.contains("2024-06-10 Mon\n  high Write report  t-1"));
        assert!(text.contains("2024-06-12 Wed\n  File expenses  t-2"));
    }

    #[test]
    fn notifications_report_inbox_state() {
        let mut inbox = NotificationInbox::default();
        let note = Notification {
            id: "t-1-0".to_string(),
            task_id: "t-1".to_string(),
            title: "Write report".to_string(),
            deadline: "2024-06-10".to_string(),
            priority: None,
            hours_left: 37.98,
            emitted_at: Utc
                .with_ymd_and_hms(2024, 6, 9, 10, 0, 0)
                .single()
                .expect("valid instant"),
            seen: false,
        };
        inbox.append(vec![note.clone()]);

        let text = render_to_string(|buf| {
            Renderer::plain().write_notifications(buf, &[note], &inbox)
        });
        assert!(text.contains("38.0h"));
        assert!(text.ends_with("inbox: 1 unseen of 1\n"));

        let empty = render_to_string(|buf| {
            Renderer::plain().write_notifications(buf, &[], &NotificationInbox::default())
        });
        assert_eq!(
            empty,
            "no deadlines need a reminder right now\ninbox: 0 unseen of 0\n"
        );
    }

    #[test]
    fn inbox_marks_unseen_reminders() {
        let emitted = Utc
            .with_ymd_and_hms(2024, 6, 9, 10, 0, 0)
            .single()
            .expect("valid instant");
        let note = |id: &str, seen: bool| Notification {
            id: format!("{id}-0"),
            task_id: id.to_string(),
            title: format!("task {id}"),
            deadline: "2024-06-10".to_string(),
            priority: None,
            hours_left: 12.0,
            emitted_at: emitted,
            seen,
        };

        let text = render_to_string(|buf| {
            Renderer::plain().write_inbox(buf, &[note("t-1", true), note("t-2", false)], &Tz::UTC)
        });
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("    2024-06-09 10:00 t-1"));
        assert!(lines[3].starts_with("*   2024-06-09 10:00 t-2"));

        let empty = render_to_string(|buf| Renderer::plain().write_inbox(buf, &[], &Tz::UTC));
        assert_eq!(empty, "inbox is empty\n");
    }

    #[test]
    fn day_listing_handles_empty_days() {
        let text = render_to_string(|buf| {
            Renderer::plain().write_day(buf, "2024-06-10", &[], &Tz::UTC)
        });
        assert_eq!(text, "no tasks due on 2024-06-10\n");
    }
}
