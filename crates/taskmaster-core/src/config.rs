use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::Weekday;
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  info,
  warn
};

use crate::calendar::CalendarViewMode;
use crate::datetime::{
  parse_weekday,
  resolve_timezone
};
use crate::notify::{
  DEFAULT_COOLDOWN_MINUTES,
  DEFAULT_LEAD_WINDOW_MINUTES,
  NotificationPolicy
};

pub const CONFIG_ENV_VAR: &str =
  "TASKMASTER_CONFIG";
const CONFIG_FILE_NAME: &str =
  "taskmaster.toml";
const DEFAULT_DATA_DIR: &str =
  "~/.taskmaster";
/// One leap year.
const MAX_POLICY_MINUTES: i64 =
  366 * 24 * 60;

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct Settings {
  #[serde(default)]
  pub timezone:      Option<String>,
  #[serde(default)]
  pub data_location: Option<String>,
  #[serde(default = "default_true")]
  pub color:         bool,
  #[serde(default)]
  pub calendar:      CalendarSection,
  #[serde(default)]
  pub notifications:
    NotificationSection
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      timezone:      None,
      data_location: None,
      color:         default_true(),
      calendar:
        CalendarSection::default(),
      notifications:
        NotificationSection::default()
    }
  }
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct CalendarSection {
  #[serde(
    default = "calendar_default_week_start"
  )]
  pub week_start:   String,
  #[serde(
    default = "calendar_default_mode"
  )]
  pub default_mode: String
}

impl Default for CalendarSection {
  fn default() -> Self {
    Self {
      week_start:
        calendar_default_week_start(),
      default_mode:
        calendar_default_mode()
    }
  }
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct NotificationSection {
  #[serde(default = "default_true")]
  pub enabled:             bool,
  #[serde(
    default = "notify_default_lead_window_minutes"
  )]
  pub lead_window_minutes: i64,
  #[serde(
    default = "notify_default_cooldown_minutes"
  )]
  pub cooldown_minutes:    i64
}

impl Default for NotificationSection {
  fn default() -> Self {
    Self {
      enabled:             default_true(),
      lead_window_minutes:
        notify_default_lead_window_minutes(
        ),
      cooldown_minutes:
        notify_default_cooldown_minutes()
    }
  }
}

fn calendar_default_week_start()
-> String {
  "sunday".to_string()
}

fn calendar_default_mode() -> String {
  "month".to_string()
}

fn default_true() -> bool {
  true
}

fn notify_default_lead_window_minutes()
-> i64 {
  DEFAULT_LEAD_WINDOW_MINUTES
}

fn notify_default_cooldown_minutes()
-> i64 {
  DEFAULT_COOLDOWN_MINUTES
}

#[derive(Debug, Clone)]
pub struct Config {
  raw:              toml::Table,
  pub settings:     Settings,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  pub fn defaults() -> Self {
    Self {
      raw:          toml::Table::new(),
      settings:     Settings::default(),
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    config_override
  ))]
  pub fn load(
    config_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    match resolve_config_path(
      config_override
    ) {
      | Some(path) if path.exists() => {
        info!(config = %path.display(), "loading config");
        cfg.load_file(&path)?;
      }
      | Some(path)
        if config_override.is_some() =>
      {
        return Err(anyhow!(
          "config file {} does not \
           exist",
          path.display()
        ));
      }
      | _ => {
        warn!(
          "no config file found; \
           using defaults"
        );
      }
    }

    Ok(cfg)
  }

  pub fn from_toml_str(
    text: &str
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();
    cfg.raw = toml::from_str(text)
      .context("invalid config toml")?;
    cfg.rebuild()?;
    Ok(cfg)
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let text =
      fs::read_to_string(path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    self.raw = toml::from_str(&text)
      .with_context(|| {
        format!(
          "failed to parse {}",
          path.display()
        )
      })?;
    self
      .loaded_files
      .push(path.to_path_buf());
    self.rebuild()
  }

  /// Applies `section.key=value` overrides on top of the loaded file.
  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) -> anyhow::Result<()>
  where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    let mut applied = 0_usize;
    for (key, value) in overrides {
      debug!(key = %key, value = %value, "applying override");
      set_dotted(
        &mut self.raw,
        key.trim(),
        parse_override_value(&value)
      )?;
      applied += 1;
    }

    if applied > 0 {
      self.rebuild()?;
    }
    Ok(())
  }

  fn rebuild(
    &mut self
  ) -> anyhow::Result<()> {
    let text = toml::to_string(&self.raw)
      .context(
        "failed to re-encode config"
      )?;
    let mut settings: Settings =
      toml::from_str(&text)
        .context("invalid config")?;
    sanitize_settings(&mut settings);
    self.settings = settings;
    Ok(())
  }

  pub fn week_start(&self) -> Weekday {
    parse_weekday(
      &self.settings.calendar.week_start
    )
    .unwrap_or(Weekday::Sun)
  }

  pub fn default_mode(
    &self
  ) -> CalendarViewMode {
    CalendarViewMode::from_key(
      &self
        .settings
        .calendar
        .default_mode
    )
    .unwrap_or_default()
  }

  pub fn notification_policy(
    &self
  ) -> NotificationPolicy {
    let section =
      &self.settings.notifications;
    NotificationPolicy {
      enabled: section.enabled,
      ..NotificationPolicy::from_minutes(
        section.lead_window_minutes,
        section.cooldown_minutes
      )
    }
  }

  pub fn timezone(&self) -> Tz {
    resolve_timezone(
      self.settings.timezone.as_deref()
    )
  }
}

fn sanitize_settings(
  settings: &mut Settings
) {
  let calendar = &mut settings.calendar;
  if parse_weekday(&calendar.week_start)
    .is_none()
  {
    warn!(
      week_start = %calendar.week_start,
      "unknown week start; using default"
    );
    calendar.week_start =
      calendar_default_week_start();
  }

  if CalendarViewMode::from_key(
    &calendar.default_mode
  )
  .is_none()
  {
    warn!(
      mode = %calendar.default_mode,
      "unknown calendar mode; using default"
    );
    calendar.default_mode =
      calendar_default_mode();
  }

  let notifications =
    &mut settings.notifications;
  if !(1..=MAX_POLICY_MINUTES)
    .contains(
      &notifications.lead_window_minutes
    )
  {
    warn!(
      value = notifications.lead_window_minutes,
      max = MAX_POLICY_MINUTES,
      "lead window out of range; using default"
    );
    notifications.lead_window_minutes =
      notify_default_lead_window_minutes(
      );
  }
  if !(1..=MAX_POLICY_MINUTES)
    .contains(
      &notifications.cooldown_minutes
    )
  {
    warn!(
      value = notifications.cooldown_minutes,
      max = MAX_POLICY_MINUTES,
      "cooldown out of range; using default"
    );
    notifications.cooldown_minutes =
      notify_default_cooldown_minutes();
  }
}

fn set_dotted(
  table: &mut toml::Table,
  key: &str,
  value: toml::Value
) -> anyhow::Result<()> {
  let mut parts =
    key.split('.').collect::<Vec<_>>();
  let Some(leaf) = parts.pop() else {
    return Err(anyhow!(
      "empty config key"
    ));
  };
  if leaf.is_empty() {
    return Err(anyhow!(
      "invalid config key: {key}"
    ));
  }

  let mut current = table;
  for part in parts {
    let entry = current
      .entry(part.to_string())
      .or_insert_with(|| {
        toml::Value::Table(
          toml::Table::new()
        )
      });
    current = match entry {
      | toml::Value::Table(inner) => {
        inner
      }
      | _ => {
        return Err(anyhow!(
          "config key {key}: `{part}` \
           is not a section"
        ));
      }
    };
  }

  current.insert(leaf.to_string(), value);
  Ok(())
}

/// `60` and `true` keep their type; anything else becomes a string.
fn parse_override_value(
  raw: &str
) -> toml::Value {
  let trimmed = raw.trim();
  toml::from_str::<toml::Table>(
    &format!("value = {trimmed}")
  )
  .ok()
  .and_then(|mut table| {
    table.remove("value")
  })
  .unwrap_or_else(|| {
    toml::Value::String(
      trimmed.to_string()
    )
  })
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_config_path(
  override_path: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = override_path {
    return Some(expand_tilde(path));
  }

  if let Ok(raw) =
    std::env::var(CONFIG_ENV_VAR)
  {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(expand_tilde(
        Path::new(trimmed)
      ));
    }
  }

  dirs::config_dir().map(|dir| {
    dir
      .join("taskmaster")
      .join(CONFIG_FILE_NAME)
  })
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) = cfg
    .settings
    .data_location
    .as_deref()
  {
    expand_tilde(Path::new(cfg_value))
  } else {
    expand_tilde(Path::new(
      DEFAULT_DATA_DIR
    ))
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    Weekday
  };

  use super::*;

  #[test]
  fn defaults_match_reminder_policy() {
    let cfg = Config::defaults();
    assert_eq!(
      cfg.week_start(),
      Weekday::Sun
    );
    assert_eq!(
      cfg.default_mode(),
      CalendarViewMode::Month
    );
    let policy =
      cfg.notification_policy();
    assert!(policy.enabled);
    assert_eq!(
      policy.lead_window,
      Duration::hours(48)
    );
    assert_eq!(
      policy.cooldown,
      Duration::hours(3)
    );
  }

  #[test]
  fn parses_file_sections() {
    let cfg = Config::from_toml_str(
      r#"
timezone = "Europe/Berlin"

[calendar]
week_start = "monday"
default_mode = "week"

[notifications]
lead_window_minutes = 120
"#
    )
    .expect("parse config");

    assert_eq!(
      cfg.week_start(),
      Weekday::Mon
    );
    assert_eq!(
      cfg.default_mode(),
      CalendarViewMode::Week
    );
    assert_eq!(
      cfg.notification_policy()
        .lead_window,
      Duration::minutes(120)
    );
    assert_eq!(
      cfg.notification_policy().cooldown,
      Duration::hours(3)
    );
    assert_eq!(
      cfg.settings.timezone.as_deref(),
      Some("Europe/Berlin")
    );
  }

  #[test]
  fn overrides_are_typed_and_sanitized() {
    let mut cfg = Config::defaults();
    cfg
      .apply_overrides(vec![
        (
          "notifications.cooldown_minutes"
            .to_string(),
          "30".to_string()
        ),
        (
          "notifications.enabled"
            .to_string(),
          "false".to_string()
        ),
        (
          "calendar.week_start"
            .to_string(),
          "someday".to_string()
        ),
        (
          "notifications.lead_window_minutes"
            .to_string(),
          "-5".to_string()
        ),
      ])
      .expect("apply overrides");

    let policy =
      cfg.notification_policy();
    assert!(!policy.enabled);
    assert_eq!(
      policy.cooldown,
      Duration::minutes(30)
    );
    assert_eq!(
      policy.lead_window,
      Duration::hours(48)
    );
    assert_eq!(
      cfg.week_start(),
      Weekday::Sun
    );
  }

  #[test]
  fn oversized_policy_minutes_reset_to_defaults()
  {
    let mut cfg = Config::from_toml_str(
      "[notifications]\n\
       lead_window_minutes = 9223372036854775807\n"
    )
    .expect("parse config");
    cfg
      .apply_overrides(vec![(
        "notifications.cooldown_minutes"
          .to_string(),
        "600000".to_string()
      )])
      .expect("apply overrides");

    let policy =
      cfg.notification_policy();
    assert_eq!(
      policy.lead_window,
      Duration::hours(48)
    );
    assert_eq!(
      policy.cooldown,
      Duration::hours(3)
    );
  }

  #[test]
  fn override_through_a_scalar_is_rejected()
  {
    let mut cfg = Config::defaults();
    cfg
      .apply_overrides(vec![(
        "timezone".to_string(),
        "UTC".to_string()
      )])
      .expect("set timezone");
    assert!(
      cfg
        .apply_overrides(vec![(
          "timezone.zone".to_string(),
          "x".to_string()
        )])
        .is_err()
    );
  }
}
