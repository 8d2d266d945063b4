//! Error taxonomy for record fetching.
//!
//! Each variant belongs to exactly one class: fail-fast, retryable or terminal.
//! The retry policy looks only at the class, never at the message.

use chrono::NaiveDate;
use thiserror::Error;

use crate::retry::Retryable;

/// Errors produced while fetching an APOD record.
///
/// `Clone` so a single in-flight result can be handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApodError {
  /// No connectivity; checked before any attempt is made.
  #[error("No internet connection")]
  NetworkUnavailable,

  /// Bad status, unreachable host or an unknown I/O failure.
  #[error("Network error: {0}")]
  Transport(String),

  /// The service answered but the response is unusable.
  #[error("Invalid response from NASA API: {0}")]
  InvalidResponse(String),

  /// Requested date is outside the range the service covers.
  #[error("Invalid date {date}. Please choose a date between June 16, 1995 and today.")]
  InvalidDate { date: NaiveDate },

  /// No API key configured, or the service rejected it.
  #[error("API key is missing or invalid")]
  MissingCredential,

  /// Payload did not match the record schema.
  #[error("Failed to decode response: {0}")]
  Decode(String),
}

impl ApodError {
  /// Whether another attempt could plausibly succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Transport(_) | Self::InvalidResponse(_))
  }

  /// Follow-up hint suitable for showing next to the error message.
  pub fn recovery_suggestion(&self) -> &'static str {
    match self {
      Self::NetworkUnavailable | Self::Transport(_) => {
        "Please check your internet connection and try again."
      }
      Self::InvalidResponse(_) | Self::Decode(_) => "Please try again later.",
      Self::InvalidDate { .. } => "Please select a valid date.",
      Self::MissingCredential => "Set APOD_API_KEY or NASA_API_KEY and try again.",
    }
  }
}

impl Retryable for ApodError {
  fn is_terminal(&self) -> bool {
    !self.is_retryable()
  }
}

impl From<reqwest::Error> for ApodError {
  fn from(err: reqwest::Error) -> Self {
    Self::Transport(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classification() {
    assert!(ApodError::Transport("reset".into()).is_retryable());
    assert!(ApodError::InvalidResponse("empty".into()).is_retryable());

    let date = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap();
    assert!(ApodError::InvalidDate { date }.is_terminal());
    assert!(ApodError::MissingCredential.is_terminal());
    assert!(ApodError::Decode("eof".into()).is_terminal());
    assert!(!ApodError::NetworkUnavailable.is_retryable());
  }

  #[test]
  fn test_every_variant_has_a_message() {
    let date = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap();
    let errors = [
      ApodError::NetworkUnavailable,
      ApodError::Transport("boom".into()),
      ApodError::InvalidResponse("no body".into()),
      ApodError::InvalidDate { date },
      ApodError::MissingCredential,
      ApodError::Decode("missing field `title`".into()),
    ];

    for err in errors {
      assert!(!err.to_string().is_empty());
      assert!(!err.recovery_suggestion().is_empty());
    }
  }

  #[test]
  fn test_invalid_date_message_names_date() {
    let date = NaiveDate::from_ymd_opt(1995, 6, 15).unwrap();
    let msg = ApodError::InvalidDate { date }.to_string();
    assert!(msg.contains("1995-06-15"));
  }
}
