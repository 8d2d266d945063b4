//! Serde-deserializable types matching APOD API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::types::{MediaKind, Record, API_DATE_FORMAT};
use crate::error::ApodError;

/// Body of `GET /planetary/apod`.
#[derive(Debug, Deserialize)]
pub struct ApiApod {
  pub copyright: Option<String>,
  pub date: String,
  pub explanation: String,
  pub hdurl: Option<String>,
  pub media_type: String,
  pub service_version: String,
  pub title: String,
  pub url: String,
}

impl ApiApod {
  pub fn into_record(self) -> Result<Record, ApodError> {
    let date = NaiveDate::parse_from_str(self.date.trim(), API_DATE_FORMAT)
      .map_err(|e| ApodError::Decode(format!("bad date {:?}: {}", self.date, e)))?;

    // The service pads attribution with newlines
    let attribution = self
      .copyright
      .map(|c| c.trim().to_string())
      .filter(|c| !c.is_empty());

    Ok(Record {
      id: Uuid::new_v4(),
      date,
      title: self.title,
      explanation: self.explanation,
      media_kind: MediaKind::from_media_type(&self.media_type),
      preview_url: self.url,
      hd_url: self.hdurl.filter(|u| !u.is_empty()),
      attribution,
      api_version: self.service_version,
    })
  }
}
