//! Cache keys for records.

use chrono::NaiveDate;
use std::fmt;

use super::types::format_api_date;

/// Sentinel key for "whatever the service considers today".
pub const TODAY_KEY: &str = "today";

/// Canonical record cache key: `"today"` or `YYYY-MM-DD`.
///
/// A request without a date and a request for today's explicit date are
/// different keys even though the service answers both with the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey(String);

impl RecordKey {
  pub fn for_date(date: Option<NaiveDate>) -> Self {
    match date {
      Some(date) => Self(format_api_date(date)),
      None => Self(TODAY_KEY.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_today_sentinel(&self) -> bool {
    self.0 == TODAY_KEY
  }
}

impl fmt::Display for RecordKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_forms() {
    assert_eq!(RecordKey::for_date(None).as_str(), "today");
    assert!(RecordKey::for_date(None).is_today_sentinel());

    let d = NaiveDate::from_ymd_opt(2001, 9, 3).unwrap();
    assert_eq!(RecordKey::for_date(Some(d)).as_str(), "2001-09-03");
    assert_eq!(RecordKey::for_date(Some(d)).to_string(), "2001-09-03");
  }

  #[test]
  fn test_sentinel_differs_from_explicit_today() {
    let today = chrono::Local::now().date_naive();
    assert_ne!(RecordKey::for_date(None), RecordKey::for_date(Some(today)));
  }

  #[test]
  fn test_equal_dates_equal_keys() {
    let a = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap();
    let b = NaiveDate::parse_from_str("2010-01-01", "%Y-%m-%d").unwrap();
    assert_eq!(RecordKey::for_date(Some(a)), RecordKey::for_date(Some(b)));
  }
}
