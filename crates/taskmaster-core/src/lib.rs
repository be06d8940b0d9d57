pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod editor;
pub mod error;
pub mod notify;
pub mod planner;
pub mod render;
pub mod store;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use crate::calendar::{
  CalendarView,
  CalendarViewMode,
  DayCell,
  NavDirection,
  group_by_day
};
pub use crate::error::{
  CalendarError,
  CalendarResult
};
pub use crate::notify::{
  DeadlineNotifier,
  Notification,
  NotificationInbox,
  NotificationPolicy
};
pub use crate::planner::Planner;
pub use crate::store::TaskStore;
pub use crate::task::Task;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting taskmaster CLI"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .overrides
      .into_iter()
      .map(|kv| (kv.key, kv.value))
  )?;
  debug!(files = ?cfg.loaded_files, "configuration loaded");

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    datastore::JsonlTaskStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?;

  let renderer =
    render::Renderer::new(&cfg);
  let command =
    cli.command.unwrap_or(
      cli::Command::Calendar {
        mode:   None,
        anchor: None,
        offset: 0
      }
    );

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;
  runtime.block_on(commands::dispatch(
    &store, &cfg, &renderer, command
  ))?;

  info!("done");
  Ok(())
}
