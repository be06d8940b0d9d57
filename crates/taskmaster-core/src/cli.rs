use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::calendar::CalendarViewMode;
use crate::task::{TaskPriority, TaskStatus};

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskmaster",
    version,
    about = "TaskMaster: calendar planning and deadline reminders for your tasks",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Config override, e.g. `--set notifications.cooldown_minutes=60`.
    #[arg(
        long = "set",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Month or week grid with the agenda of the visible days.
    Calendar {
        #[arg(long, value_parser = parse_mode)]
        mode: Option<CalendarViewMode>,

        /// Day the view is anchored on (defaults to today).
        #[arg(long)]
        anchor: Option<String>,

        /// Pages forward (positive) or back (negative) from the anchor.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i32,
    },

    /// Tasks due on one day.
    Day { date: String },

    /// Creates a task through the task form.
    Add {
        #[arg(long)]
        title: String,

        /// Due day or instant, e.g. 2024-06-10 or 2024-06-10T09:00.
        #[arg(long)]
        due: String,

        #[arg(long, value_parser = parse_priority)]
        priority: Option<TaskPriority>,

        #[arg(long)]
        assignee: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Changes fields of an existing task. Omitted flags keep their values.
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        due: Option<String>,

        #[arg(long, value_parser = parse_priority)]
        priority: Option<TaskPriority>,

        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,

        #[arg(long)]
        assignee: Option<String>,

        /// Free-text notes; an empty string clears them.
        #[arg(long)]
        description: Option<String>,
    },

    /// Reschedules a task to another day, as a calendar drag would.
    Move { id: String, day: String },

    /// Runs one deadline scan and prints the reminders it produced.
    Notify {
        /// Evaluate as if it were this instant.
        #[arg(long)]
        now: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Lists the kept reminders and marks them seen.
    Inbox {
        #[arg(long)]
        json: bool,
    },
}

fn parse_mode(raw: &str) -> anyhow::Result<CalendarViewMode> {
    CalendarViewMode::from_key(raw).ok_or_else(|| anyhow!("expected month or week, got: {raw}"))
}

fn parse_priority(raw: &str) -> anyhow::Result<TaskPriority> {
    TaskPriority::from_key(raw).ok_or_else(|| anyhow!("expected low, medium or high, got: {raw}"))
}

fn parse_status(raw: &str) -> anyhow::Result<TaskStatus> {
    TaskStatus::from_key(raw)
        .ok_or_else(|| anyhow!("expected todo, in_progress or completed, got: {raw}"))
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
