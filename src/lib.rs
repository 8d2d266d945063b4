//! Cached, retrying client for the Astronomy Picture of the Day service.
//!
//! [`ApodServices`] bundles the record coordinator (connectivity gate, retry
//! policy, in-memory record cache with shared in-flight fetches) and the
//! two-tier asset cache.

pub mod apod;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod logging;
pub mod query;
pub mod retry;
pub mod services;

pub use apod::{MediaKind, Record};
pub use config::Config;
pub use error::ApodError;
pub use services::ApodServices;
