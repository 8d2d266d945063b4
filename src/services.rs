//! Process-scoped services, built once at startup and passed by handle.

use chrono::NaiveDate;
use color_eyre::Result;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::apod::{ApodClient, CachedApodClient, Record};
use crate::cache::{AssetCache, Blob};
use crate::config::Config;
use crate::connectivity::{probe_target, Connectivity};
use crate::error::ApodError;
use crate::http::{HttpTransport, ReqwestTransport};

/// Record coordinator, asset cache and reachability gate for one process.
///
/// Cheap to clone; clones share every cache.
#[derive(Clone)]
pub struct ApodServices {
  records: CachedApodClient,
  assets: AssetCache,
  connectivity: Connectivity,
  probe: Option<Arc<ProbeHandle>>,
}

/// Aborts the reachability probe when the last services handle is dropped.
struct ProbeHandle(JoinHandle<()>);

impl Drop for ProbeHandle {
  fn drop(&mut self) {
    self.0.abort();
  }
}

impl ApodServices {
  /// Build services from configuration with the production HTTP transport.
  ///
  /// Starts the reachability probe when enabled; must be called inside a
  /// tokio runtime.
  pub fn new(config: &Config) -> Result<Self> {
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(config.api.timeout_secs))?);
    let mut services = Self::with_transport(config, transport, Connectivity::default())?;

    if config.connectivity.probe {
      match probe_target(&config.api.base_url) {
        Some(target) => {
          info!(%target, "Starting reachability probe");
          let handle = services
            .connectivity
            .spawn_probe(target, config.connectivity.probe_interval());
          services.probe = Some(Arc::new(ProbeHandle(handle)));
        }
        None => warn!(url = %config.api.base_url, "No host to probe for reachability"),
      }
    }

    Ok(services)
  }

  /// Build services over an explicit transport and gate, without a probe.
  pub fn with_transport(
    config: &Config,
    transport: Arc<dyn HttpTransport>,
    connectivity: Connectivity,
  ) -> Result<Self> {
    let client = ApodClient::new(config, Arc::clone(&transport));
    let records = CachedApodClient::new(client, connectivity.clone(), config.retry.policy());
    let assets = AssetCache::new(&config.assets, transport)?;

    Ok(Self {
      records,
      assets,
      connectivity,
      probe: None,
    })
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn records(&self) -> &CachedApodClient {
    &self.records
  }

  pub fn assets(&self) -> &AssetCache {
    &self.assets
  }

  /// Record for `date`, or today's record for `None`.
  pub async fn get_record(&self, date: Option<NaiveDate>) -> Result<Record, ApodError> {
    self.records.get_record(date).await
  }

  pub async fn clear_record_cache(&self) {
    self.records.clear_cache().await;
  }

  /// Cached asset for `url`; never touches the network.
  pub async fn get_asset(&self, url: &str) -> Option<Blob> {
    self.assets.get(url).await
  }

  /// Cached asset for `url`, downloading and caching it on a miss.
  pub async fn fetch_and_cache_asset(&self, url: &str) -> Option<Blob> {
    self.assets.fetch_and_cache(url).await
  }

  pub async fn clear_asset_cache(&self) -> io::Result<()> {
    self.assets.clear().await
  }

  pub async fn asset_cache_size_on_disk(&self) -> u64 {
    self.assets.size_on_disk().await
  }
}
