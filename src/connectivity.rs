//! Network reachability gate.
//!
//! Holds the last observed reachability value. Updates are pushed in, either by
//! the embedding application or by the TCP probe started with
//! [`Connectivity::spawn_probe`]; reads never block.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::error::ApodError;

/// Upper bound for a single probe connection attempt.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared reachability flag. Cloning yields another handle to the same flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}

impl Connectivity {
  pub fn new(initially_reachable: bool) -> Self {
    let (tx, _rx) = watch::channel(initially_reachable);
    Self { tx: Arc::new(tx) }
  }

  /// Last observed value; may lag the real network state by one probe.
  pub fn is_reachable(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record a new observation. Receivers are only woken on change.
  pub fn set_reachable(&self, reachable: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == reachable {
        false
      } else {
        *current = reachable;
        true
      }
    });

    if changed {
      info!(reachable, "Network reachability changed");
    }
  }

  /// Fail fast with [`ApodError::NetworkUnavailable`] when offline.
  pub fn check(&self) -> Result<(), ApodError> {
    if self.is_reachable() {
      Ok(())
    } else {
      Err(ApodError::NetworkUnavailable)
    }
  }

  /// Watch reachability changes.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Periodically open a TCP connection to `target` (`host:port`) and push
  /// the outcome. The task ends once every handle to this gate is dropped.
  pub fn spawn_probe(&self, target: String, interval: Duration) -> JoinHandle<()> {
    let weak: Weak<watch::Sender<bool>> = Arc::downgrade(&self.tx);

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;

        let reachable = probe(&target).await;
        let Some(tx) = weak.upgrade() else {
          debug!("Connectivity gate dropped, stopping probe");
          break;
        };
        Connectivity { tx }.set_reachable(reachable);
      }
    })
  }
}

/// `host:port` to probe for a service URL.
pub fn probe_target(url: &Url) -> Option<String> {
  let host = url.host_str()?;
  let port = url.port_or_known_default()?;
  Some(format!("{}:{}", host, port))
}

async fn probe(target: &str) -> bool {
  match tokio::time::timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(target)).await {
    Ok(Ok(_)) => true,
    Ok(Err(e)) => {
      debug!(target, error = %e, "Reachability probe failed");
      false
    }
    Err(_) => {
      debug!(target, "Reachability probe timed out");
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::net::TcpListener;

  #[test]
  fn test_defaults_to_reachable() {
    let gate = Connectivity::default();
    assert!(gate.is_reachable());
    assert!(gate.check().is_ok());
  }

  #[test]
  fn test_offline_fails_fast() {
    let gate = Connectivity::default();
    gate.set_reachable(false);

    assert!(!gate.is_reachable());
    assert_eq!(gate.check(), Err(ApodError::NetworkUnavailable));
  }

  #[test]
  fn test_clones_share_state() {
    let gate = Connectivity::new(true);
    let other = gate.clone();
    other.set_reachable(false);
    assert!(!gate.is_reachable());
  }

  #[tokio::test]
  async fn test_subscribers_see_changes() {
    let gate = Connectivity::new(true);
    let mut rx = gate.subscribe();

    gate.set_reachable(false);
    rx.changed().await.unwrap();
    assert!(!*rx.borrow_and_update());

    // Same value again does not wake receivers
    gate.set_reachable(false);
    assert!(!rx.has_changed().unwrap());
  }

  #[test]
  fn test_probe_target() {
    let url = Url::parse("https://api.nasa.gov/planetary/apod").unwrap();
    assert_eq!(probe_target(&url).as_deref(), Some("api.nasa.gov:443"));

    let url = Url::parse("http://127.0.0.1:8080/apod").unwrap();
    assert_eq!(probe_target(&url).as_deref(), Some("127.0.0.1:8080"));
  }

  #[tokio::test]
  async fn test_probe_marks_reachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let gate = Connectivity::new(false);
    let mut rx = gate.subscribe();
    let handle = gate.spawn_probe(addr.to_string(), Duration::from_millis(20));

    tokio::time::timeout(Duration::from_secs(2), rx.changed())
      .await
      .unwrap()
      .unwrap();
    assert!(gate.is_reachable());
    handle.abort();
  }

  #[tokio::test]
  async fn test_probe_marks_unreachable() {
    // Bind then drop to get a port nothing listens on
    let addr = {
      let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
      listener.local_addr().unwrap()
    };

    let gate = Connectivity::new(true);
    let mut rx = gate.subscribe();
    let handle = gate.spawn_probe(addr.to_string(), Duration::from_millis(20));

    tokio::time::timeout(Duration::from_secs(2), rx.changed())
      .await
      .unwrap()
      .unwrap();
    assert!(!gate.is_reachable());
    handle.abort();
  }

  #[tokio::test]
  async fn test_probe_stops_when_gate_dropped() {
    let gate = Connectivity::new(true);
    let handle = gate.spawn_probe("127.0.0.1:9".to_string(), Duration::from_millis(10));
    drop(gate);

    tokio::time::timeout(Duration::from_secs(2), handle)
      .await
      .unwrap()
      .unwrap();
  }
}
