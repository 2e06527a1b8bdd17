//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::cache::{CacheKey, CacheStorage, CachedResponse, MemoryStorage};
use crate::http::{Request, Response};
use crate::net::Fetcher;

/// Fetcher serving canned bodies, with a switch to take the network down.
#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve `body` with status 200 for `url`.
  pub fn serve(&self, url: &str, body: &str) {
    self.serve_response(url, Response::new(url, 200, body.to_string()));
  }

  pub fn serve_response(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Network unavailable: {}", request.url));
    }
    let routes = self.routes.lock().unwrap();
    match routes.get(&request.identity()) {
      Some(resp) => Ok(resp.clone()),
      None => Ok(Response::new(request.url.as_str(), 404, "not found")),
    }
  }
}

/// Storage whose writes always fail; reads go to an inner memory store.
#[derive(Default)]
pub struct ReadOnlyStorage {
  pub inner: MemoryStorage,
}

impl CacheStorage for ReadOnlyStorage {
  fn generation_names(&self) -> Result<Vec<String>> {
    self.inner.generation_names()
  }

  fn open_generation(&self, name: &str) -> Result<()> {
    self.inner.open_generation(name)
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    self.inner.delete_generation(name)
  }

  fn get(&self, generation: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    self.inner.get(generation, key)
  }

  fn put(&self, _generation: &str, _key: &CacheKey, _response: &Response) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn put_all(&self, _generation: &str, _entries: &[(CacheKey, Response)]) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    self.inner.entry_count(generation)
  }
}

/// Storage that cannot list its generations, so activation fails; every
/// other operation goes to an inner memory store.
#[derive(Default)]
pub struct UnlistableStorage {
  pub inner: MemoryStorage,
}

impl CacheStorage for UnlistableStorage {
  fn generation_names(&self) -> Result<Vec<String>> {
    Err(eyre!("database is locked"))
  }

  fn open_generation(&self, name: &str) -> Result<()> {
    self.inner.open_generation(name)
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    self.inner.delete_generation(name)
  }

  fn get(&self, generation: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    self.inner.get(generation, key)
  }

  fn put(&self, generation: &str, key: &CacheKey, response: &Response) -> Result<()> {
    self.inner.put(generation, key, response)
  }

  fn put_all(&self, generation: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    self.inner.put_all(generation, entries)
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    self.inner.entry_count(generation)
  }
}
