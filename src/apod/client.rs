use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::apod::api_types::ApiApod;
use crate::apod::types::{default_service_start, format_api_date, Record};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::ApodError;
use crate::http::HttpTransport;

/// APOD API client.
///
/// Stateless apart from configuration; clones share the transport and can be
/// used from any number of tasks at once.
#[derive(Clone)]
pub struct ApodClient {
  transport: Arc<dyn HttpTransport>,
  base_url: Url,
  api_key: Option<String>,
  service_start: NaiveDate,
  clock: Arc<dyn Clock>,
}

impl ApodClient {
  /// Build a client from configuration, reading the API key from the environment.
  ///
  /// A missing key is not an error here: every fetch reports
  /// [`ApodError::MissingCredential`] instead.
  pub fn new(config: &Config, transport: Arc<dyn HttpTransport>) -> Self {
    let api_key = Config::get_api_key().ok();

    Self::with_transport(transport, config.api.base_url.clone(), api_key)
      .with_service_start(config.api.service_start)
  }

  pub fn with_transport(
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    api_key: Option<String>,
  ) -> Self {
    Self {
      transport,
      base_url,
      api_key,
      service_start: default_service_start(),
      clock: Arc::new(SystemClock),
    }
  }

  pub fn with_service_start(mut self, service_start: NaiveDate) -> Self {
    self.service_start = service_start;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Check that `date` lies within `[service_start, today]`.
  pub fn validate_date(&self, date: NaiveDate) -> Result<(), ApodError> {
    if date < self.service_start || date > self.clock.today() {
      return Err(ApodError::InvalidDate { date });
    }
    Ok(())
  }

  /// Build the request URL; `None` asks for the most recent record.
  pub fn request_url(&self, date: Option<NaiveDate>) -> Result<Url, ApodError> {
    let api_key = self
      .api_key
      .as_deref()
      .filter(|k| !k.is_empty())
      .ok_or(ApodError::MissingCredential)?;

    if let Some(date) = date {
      self.validate_date(date)?;
    }

    let mut url = self.base_url.clone();
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("api_key", api_key);
      query.append_pair("hd", "true");
      if let Some(date) = date {
        query.append_pair("date", &format_api_date(date));
      }
    }

    Ok(url)
  }

  /// Fetch the record for `date`, or the latest one when `None`.
  ///
  /// Makes exactly one request; retrying is the caller's business.
  pub async fn fetch(&self, date: Option<NaiveDate>) -> Result<Record, ApodError> {
    let url = self.request_url(date)?;

    // The URL carries the API key, so only the date is logged
    debug!(date = ?date, "Requesting APOD record");

    let response = self
      .transport
      .get(&url)
      .await
      .map_err(|e| ApodError::Transport(e.to_string()))?;

    // Rejected key: retrying with the same key will not help
    if response.status == 403 {
      return Err(ApodError::MissingCredential);
    }

    if !response.is_success() {
      return Err(ApodError::Transport(format!(
        "unexpected status {}",
        response.status
      )));
    }

    if response.body.is_empty() {
      return Err(ApodError::InvalidResponse("empty body".to_string()));
    }

    let api: ApiApod =
      serde_json::from_slice(&response.body).map_err(|e| ApodError::Decode(e.to_string()))?;
    let record = api.into_record()?;

    if let Some(requested) = date {
      if record.date != requested {
        return Err(ApodError::InvalidResponse(format!(
          "asked for {} but got {}",
          requested, record.date
        )));
      }
    }

    Ok(record)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::clock::FixedClock;
  use crate::http::testing::FakeTransport;
  use crate::http::{HttpResponse, TransportError};

  pub const BASE_URL: &str = "https://api.nasa.gov/planetary/apod";

  pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
  }

  pub fn apod_json(date: &str) -> String {
    format!(
      r#"{{
        "date": "{date}",
        "explanation": "Stars.",
        "hdurl": "https://apod.nasa.gov/apod/image/{date}.jpg",
        "media_type": "image",
        "service_version": "v1",
        "title": "Picture for {date}",
        "url": "https://apod.nasa.gov/apod/image/{date}_small.jpg"
      }}"#
    )
  }

  /// Date requested by `url`, or `today()` when absent.
  pub fn requested_date(url: &Url) -> String {
    url
      .query_pairs()
      .find(|(k, _)| k == "date")
      .map(|(_, v)| v.into_owned())
      .unwrap_or_else(|| format_api_date(today()))
  }

  /// Transport that answers every request with a valid record for the asked date.
  pub fn echo_transport() -> FakeTransport {
    FakeTransport::new(|url| Ok(HttpResponse::new(200, apod_json(&requested_date(url)))))
  }

  pub fn client(transport: Arc<FakeTransport>) -> ApodClient {
    ApodClient::with_transport(
      transport,
      Url::parse(BASE_URL).unwrap(),
      Some("DEMO_KEY".to_string()),
    )
    .with_clock(Arc::new(FixedClock(today())))
  }

  #[test]
  fn test_request_url_with_date() {
    let client = client(Arc::new(echo_transport()));
    let date = NaiveDate::from_ymd_opt(2000, 1, 2).unwrap();
    let url = client.request_url(Some(date)).unwrap();

    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(
      pairs,
      vec![
        ("api_key".to_string(), "DEMO_KEY".to_string()),
        ("hd".to_string(), "true".to_string()),
        ("date".to_string(), "2000-01-02".to_string()),
      ]
    );
    assert_eq!(url.path(), "/planetary/apod");
  }

  #[test]
  fn test_request_url_latest_omits_date() {
    let client = client(Arc::new(echo_transport()));
    let url = client.request_url(None).unwrap();
    assert!(url.query_pairs().all(|(k, _)| k != "date"));
  }

  #[test]
  fn test_date_range_is_inclusive() {
    let client = client(Arc::new(echo_transport()));

    assert!(client.validate_date(default_service_start()).is_ok());
    assert!(client.validate_date(today()).is_ok());
    assert!(client
      .validate_date(default_service_start().pred_opt().unwrap())
      .is_err());
    assert!(client.validate_date(today().succ_opt().unwrap()).is_err());
  }

  #[tokio::test]
  async fn test_fetch_returns_record_for_date() {
    let transport = Arc::new(echo_transport());
    let client = client(transport.clone());
    let date = NaiveDate::from_ymd_opt(2020, 2, 29).unwrap();

    let record = client.fetch(Some(date)).await.unwrap();
    assert_eq!(record.date, date);
    assert_eq!(record.title, "Picture for 2020-02-29");
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_out_of_range_dates_make_no_request() {
    let transport = Arc::new(echo_transport());
    let client = client(transport.clone());

    let early = NaiveDate::from_ymd_opt(1995, 6, 15).unwrap();
    let future = today().succ_opt().unwrap();

    assert_eq!(
      client.fetch(Some(early)).await,
      Err(ApodError::InvalidDate { date: early })
    );
    assert_eq!(
      client.fetch(Some(future)).await,
      Err(ApodError::InvalidDate { date: future })
    );
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_missing_key_checked_before_date() {
    let transport = Arc::new(echo_transport());
    let client = ApodClient::with_transport(transport.clone(), Url::parse(BASE_URL).unwrap(), None);
    let early = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap();

    assert_eq!(client.fetch(Some(early)).await, Err(ApodError::MissingCredential));
    assert_eq!(transport.calls(), 0);

    let client = ApodClient::with_transport(
      transport.clone(),
      Url::parse(BASE_URL).unwrap(),
      Some(String::new()),
    );
    assert_eq!(client.fetch(None).await, Err(ApodError::MissingCredential));
  }

  #[tokio::test]
  async fn test_status_mapping() {
    for (status, expected_retryable) in [(500u16, true), (503, true), (404, true), (429, true)] {
      let transport = Arc::new(FakeTransport::new(move |_| Ok(HttpResponse::new(status, "{}"))));
      let err = client(transport).fetch(None).await.unwrap_err();
      assert!(matches!(err, ApodError::Transport(_)));
      assert_eq!(err.is_retryable(), expected_retryable);
    }

    let transport = Arc::new(FakeTransport::new(|_| Ok(HttpResponse::new(403, "{}"))));
    let err = client(transport).fetch(None).await.unwrap_err();
    assert_eq!(err, ApodError::MissingCredential);
    assert!(!err.is_retryable());
  }

  #[tokio::test]
  async fn test_transport_failure_is_retryable() {
    let transport = Arc::new(FakeTransport::new(|_| {
      Err(TransportError("connection refused".to_string()))
    }));
    let err = client(transport).fetch(None).await.unwrap_err();
    assert_eq!(err, ApodError::Transport("connection refused".to_string()));
    assert!(err.is_retryable());
  }

  #[tokio::test]
  async fn test_malformed_payload_is_decode_error() {
    let transport = Arc::new(FakeTransport::new(|_| {
      Ok(HttpResponse::new(200, r#"{"title": "only a title"}"#))
    }));
    let err = client(transport).fetch(None).await.unwrap_err();
    assert!(matches!(err, ApodError::Decode(_)));
    assert!(!err.is_retryable());
  }

  #[tokio::test]
  async fn test_empty_body_is_invalid_response() {
    let transport = Arc::new(FakeTransport::new(|_| Ok(HttpResponse::new(200, ""))));
    let err = client(transport).fetch(None).await.unwrap_err();
    assert!(matches!(err, ApodError::InvalidResponse(_)));
  }

  #[tokio::test]
  async fn test_mismatched_date_is_rejected() {
    let transport = Arc::new(FakeTransport::new(|_| {
      Ok(HttpResponse::new(200, apod_json("2010-10-10")))
    }));
    let date = NaiveDate::from_ymd_opt(2011, 11, 11).unwrap();
    let err = client(transport).fetch(Some(date)).await.unwrap_err();
    assert!(matches!(err, ApodError::InvalidResponse(_)));
  }
}
