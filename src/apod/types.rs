use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

/// Wire and cache-key format for dates.
pub const API_DATE_FORMAT: &str = "%Y-%m-%d";

/// First day the service has a record for.
pub fn default_service_start() -> NaiveDate {
  NaiveDate::from_ymd_opt(1995, 6, 16).expect("1995-06-16 is a valid date")
}

/// Format a date the way the service expects it.
pub fn format_api_date(date: NaiveDate) -> String {
  date.format(API_DATE_FORMAT).to_string()
}

/// Kind of media a record points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
  Image,
  Video,
  Other,
}

impl MediaKind {
  /// Map the service's `media_type` string, case-insensitively.
  pub fn from_media_type(media_type: &str) -> Self {
    match media_type.trim().to_ascii_lowercase().as_str() {
      "image" => Self::Image,
      "video" => Self::Video,
      _ => Self::Other,
    }
  }
}

/// One day's astronomy picture record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
  /// Opaque token assigned when the record is decoded
  pub id: Uuid,
  pub date: NaiveDate,
  pub title: String,
  pub explanation: String,
  pub media_kind: MediaKind,
  pub preview_url: String,
  /// Absent for videos and some low-bandwidth responses
  pub hd_url: Option<String>,
  pub attribution: Option<String>,
  pub api_version: String,
}

impl Record {
  pub fn is_image(&self) -> bool {
    self.media_kind == MediaKind::Image
  }

  /// Best available asset: the HD variant when present.
  pub fn effective_asset_url(&self) -> &str {
    self.hd_url.as_deref().unwrap_or(&self.preview_url)
  }
}
