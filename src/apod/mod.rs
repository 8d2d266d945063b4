//! APOD service access: wire types, the HTTP client and its caching wrapper.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod types;

pub use cache::RecordKey;
pub use cached_client::CachedApodClient;
pub use client::ApodClient;
pub use types::{MediaKind, Record};
