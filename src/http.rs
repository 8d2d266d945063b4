//! HTTP transport used by the record client and the asset cache.
//!
//! The trait is the only seam between this crate and the network.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A boxed, sendable future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Bytes,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// No usable response could be obtained (connect, TLS, timeout, body read).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Minimal GET transport.
pub trait HttpTransport: Send + Sync {
  fn get<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<HttpResponse, TransportError>>;
}

/// Production transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  /// Build a client; `timeout` bounds every request end to end.
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("apod/", env!("CARGO_PKG_VERSION")))
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl HttpTransport for ReqwestTransport {
  fn get<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
    Box::pin(async move {
      let response = self
        .client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| TransportError(e.without_url().to_string()))?;

      let status = response.status().as_u16();
      let body = response
        .bytes()
        .await
        .map_err(|e| TransportError(e.without_url().to_string()))?;

      Ok(HttpResponse { status, body })
    })
  }
}
