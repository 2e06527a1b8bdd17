//! Network seam: the `Fetcher` trait and its reqwest implementation.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::ACCEPT;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::http::{Request, Response};

/// Anything that can turn a request into a response over the network.
///
/// An `Err` means the network failed (DNS, connect, timeout...). HTTP error
/// statuses are returned as regular responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Lazily built, shared HTTP client.
///
/// The first `get` builds the client; later calls hand out the same one
/// until `reset` drops it.
pub struct ClientSlot {
  client: Mutex<Option<reqwest::Client>>,
  timeout: Duration,
  user_agent: String,
  builds: AtomicUsize,
}

impl ClientSlot {
  pub fn new(timeout: Duration, user_agent: impl Into<String>) -> Self {
    Self {
      client: Mutex::new(None),
      timeout,
      user_agent: user_agent.into(),
      builds: AtomicUsize::new(0),
    }
  }

  /// Get the shared client, building it on first use.
  pub fn get(&self) -> Result<reqwest::Client> {
    let mut slot = self
      .client
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(client) = slot.as_ref() {
      return Ok(client.clone());
    }

    let client = reqwest::Client::builder()
      .timeout(self.timeout)
      .user_agent(self.user_agent.clone())
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    self.builds.fetch_add(1, Ordering::Relaxed);
    debug!(builds = self.build_count(), "built shared HTTP client");

    *slot = Some(client.clone());
    Ok(client)
  }

  /// Drop the shared client; the next `get` builds a fresh one.
  pub fn reset(&self) {
    // A poisoned slot still only holds an Option; clearing it is always safe
    *self.client.lock().unwrap_or_else(PoisonError::into_inner) = None;
  }

  pub fn is_initialized(&self) -> bool {
    self
      .client
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some()
  }

  /// How many clients have been built so far.
  pub fn build_count(&self) -> usize {
    self.builds.load(Ordering::Relaxed)
  }
}

impl Default for ClientSlot {
  fn default() -> Self {
    Self::new(
      Duration::from_secs(30),
      concat!("shellcache/", env!("CARGO_PKG_VERSION")),
    )
  }
}

/// Fetcher backed by reqwest.
pub struct HttpFetcher {
  clients: ClientSlot,
}

impl HttpFetcher {
  pub fn new(clients: ClientSlot) -> Self {
    Self { clients }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let client = self.clients.get()?;

    let mut builder = client.request(request.method.clone(), request.url.clone());
    if let Some(accept) = &request.accept {
      builder = builder.header(ACCEPT, accept);
    }

    let resp = builder
      .send()
      .await
      .map_err(|e| eyre!("Network request to {} failed: {}", request.url, e))?;

    let url = resp.url().to_string();
    let status = resp.status();
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?;

    Ok(Response {
      url,
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or("").to_string(),
      headers,
      body,
    })
  }
}

/// Fetcher for a disconnected host: every request fails.
pub struct Disconnected;

#[async_trait]
impl Fetcher for Disconnected {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    Err(eyre!("Network unavailable: {}", request.url))
  }
}
