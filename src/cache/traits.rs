//! Core types for the caching system.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use crate::http::{Request, Response};

/// Storage key for a request.
///
/// The hash is stable and fixed-length; the identity is kept alongside it so
/// stored entries stay human readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub hash: String,
  pub identity: String,
}

impl CacheKey {
  pub fn new(method: &Method, identity: &str) -> Self {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(identity.as_bytes());
    Self {
      hash: hex::encode(hasher.finalize()),
      identity: identity.to_string(),
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, &request.identity())
  }
}

/// A response stored in a cache generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was written
  pub cached_at: DateTime<Utc>,
}

/// Result from a strategy, including the response and where it came from.
#[derive(Debug)]
pub struct FetchResult {
  /// The response handed back to the page
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Background refresh started by stale-while-revalidate
  pub revalidation: Option<JoinHandle<()>>,
}

impl FetchResult {
  /// Fresh data from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
      revalidation: None,
    }
  }

  /// Cached data served without touching the network first.
  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
      revalidation: None,
    }
  }

  /// Cached copy of the request served because the network failed.
  pub fn offline(cached: CachedResponse) -> Self {
    Self {
      source: ResponseSource::Offline,
      ..Self::from_cache(cached)
    }
  }

  /// Offline page served in place of a page the network could not deliver.
  pub fn offline_page(cached: CachedResponse) -> Self {
    Self {
      source: ResponseSource::OfflinePage,
      ..Self::from_cache(cached)
    }
  }

  pub fn with_revalidation(mut self, handle: JoinHandle<()>) -> Self {
    self.revalidation = Some(handle);
    self
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Data from cache, network not consulted first
  Cache,
  /// Network unavailable, serving the cached copy of this request
  Offline,
  /// Network unavailable and nothing cached, serving the offline page
  OfflinePage,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
      Self::OfflinePage => "offline-page",
    };
    f.write_str(name)
  }
}
