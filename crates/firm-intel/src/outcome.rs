//! Stage outcomes.
//!
//! Every stage hands back a structurally valid value together with a status
//! that says whether the value is the real answer, an empty answer because
//! the input had nothing to work with, a fallback after a routine failed, or
//! a placeholder because an earlier stage stopped the run.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Status {
  Complete,
  NoData { reason: String },
  Degraded { reason: String },
  Skipped { reason: String },
}

impl Status {
  pub fn reason(&self) -> Option<&str> {
    match self {
      Status::Complete => None,
      Status::NoData { reason } | Status::Degraded { reason } | Status::Skipped { reason } => {
        Some(reason)
      }
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      Status::Complete => "complete",
      Status::NoData { .. } => "no data",
      Status::Degraded { .. } => "degraded",
      Status::Skipped { .. } => "skipped",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
  pub value: T,
  pub status: Status,
}

impl<T> Outcome<T> {
  pub fn complete(value: T) -> Self {
    Self { value, status: Status::Complete }
  }

  pub fn degraded(value: T, reason: impl Into<String>) -> Self {
    Self { value, status: Status::Degraded { reason: reason.into() } }
  }

  pub fn is_complete(&self) -> bool {
    self.status == Status::Complete
  }

  pub fn is_degraded(&self) -> bool {
    matches!(self.status, Status::Degraded { .. })
  }

  pub fn is_no_data(&self) -> bool {
    matches!(self.status, Status::NoData { .. })
  }

  pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
    Outcome { value: f(self.value), status: self.status }
  }

  pub fn into_value(self) -> T {
    self.value
  }
}

impl<T: Default> Outcome<T> {
  pub fn no_data(reason: impl Into<String>) -> Self {
    Self { value: T::default(), status: Status::NoData { reason: reason.into() } }
  }

  pub fn skipped(reason: impl Into<String>) -> Self {
    Self { value: T::default(), status: Status::Skipped { reason: reason.into() } }
  }
}
