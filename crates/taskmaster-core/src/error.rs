//! Error taxonomy for the calendar core.
//!
//! Failures are either absorbed locally (a malformed due date on an existing
//! task is logged and the task skipped) or handed back to the host for inline
//! display. Nothing here is fatal.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unrecognized date `{input}`")]
pub struct DateParseError {
    pub input: String,
}

impl DateParseError {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
        }
    }
}

/// Missing or malformed form fields. Shown inline next to the form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("title is required")]
    MissingTitle,

    #[error("due date is required")]
    MissingDueDate,

    #[error("due date `{0}` is not a valid date")]
    InvalidDueDate(String),

    #[error("no task form is open")]
    FormClosed,
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    DateParse(#[from] DateParseError),

    #[error("task store rejected {operation}: {message}")]
    MutationFailure {
        operation: &'static str,
        message: String,
    },
}

impl CalendarError {
    pub fn mutation(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::MutationFailure {
            operation,
            message: format!("{err:#}"),
        }
    }

    /// Message suitable for an inline form hint or a toast.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(err) => err.to_string(),
            Self::DateParse(err) => err.to_string(),
            Self::MutationFailure { operation, .. } => {
                format!("could not {operation} the task, please try again")
            }
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type CalendarResult<T> = Result<T, CalendarError>;
