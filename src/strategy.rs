//! Strategy executors: cache-first, network-first and stale-while-revalidate.

use color_eyre::{eyre::WrapErr, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStorage, CacheTarget, CachedResponse, FetchResult, Generations};
use crate::http::{Request, Response};
use crate::net::Fetcher;

/// Runs the caching strategies against a storage backend and a fetcher.
///
/// Reads search every current generation (static, runtime, fonts), the way a
/// browser's `caches.match` does. Writes go to the runtime generation, or to
/// the font generation for font targets.
pub struct Strategies<S: CacheStorage> {
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  generations: Arc<Generations>,
}

impl<S: CacheStorage> Strategies<S> {
  pub fn new(storage: Arc<S>, fetcher: Arc<dyn Fetcher>, generations: Arc<Generations>) -> Self {
    Self {
      storage,
      fetcher,
      generations,
    }
  }

  /// Find a cached copy of the request in any current generation.
  pub fn lookup(&self, request: &Request) -> Result<Option<CachedResponse>> {
    let key = CacheKey::for_request(request);
    for generation in self.generations.allow_list() {
      if let Some(cached) = self.storage.get(generation, &key)? {
        return Ok(Some(cached));
      }
    }
    Ok(None)
  }

  /// Cache-first.
  ///
  /// 1. Cached copy present - return it, no network
  /// 2. Otherwise fetch, store a copy, return the response
  /// 3. Network failure with nothing cached propagates
  pub async fn cache_first(&self, request: &Request, target: CacheTarget) -> Result<FetchResult> {
    if let Some(cached) = self.lookup(request)? {
      return Ok(FetchResult::from_cache(cached));
    }

    let response = self
      .fetcher
      .fetch(request)
      .await
      .wrap_err_with(|| format!("Nothing cached for {}", request.identity()))?;

    self.store(self.generations.for_target(target), request, &response);
    Ok(FetchResult::from_network(response))
  }

  /// Network-first.
  ///
  /// 1. Fetch, store a copy, return the response
  /// 2. On network failure, return the cached copy of the request
  /// 3. Else the cached offline page, when one is given
  /// 4. Else the network failure propagates
  pub async fn network_first(
    &self,
    request: &Request,
    target: CacheTarget,
    offline_page: Option<&Request>,
  ) -> Result<FetchResult> {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.store(self.generations.for_target(target), request, &response);
        Ok(FetchResult::from_network(response))
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "network failed, falling back to cache");

        if let Some(cached) = self.lookup(request)? {
          return Ok(FetchResult::offline(cached));
        }

        if let Some(page) = offline_page {
          if let Some(cached) = self.lookup(page)? {
            return Ok(FetchResult::offline_page(cached));
          }
          warn!(offline_page = %page.url, "offline page is not cached");
        }

        Err(err.wrap_err(format!("Nothing cached for {}", request.identity())))
      }
    }
  }

  /// Stale-while-revalidate.
  ///
  /// A cached copy is returned at once while a background task refreshes the
  /// cache for the next request. Without a cached copy the network response is
  /// awaited, stored and returned; a network failure then propagates.
  pub async fn stale_while_revalidate(
    &self,
    request: &Request,
    target: CacheTarget,
  ) -> Result<FetchResult> {
    let generation = self.generations.for_target(target);

    if let Some(cached) = self.lookup(request)? {
      let handle = self.spawn_revalidation(request.clone(), generation.to_string());
      return Ok(FetchResult::from_cache(cached).with_revalidation(handle));
    }

    let response = self
      .fetcher
      .fetch(request)
      .await
      .wrap_err_with(|| format!("Nothing cached for {}", request.identity()))?;

    self.store(generation, request, &response);
    Ok(FetchResult::from_network(response))
  }

  fn spawn_revalidation(&self, request: Request, generation: String) -> JoinHandle<()> {
    let storage = Arc::clone(&self.storage);
    let fetcher = Arc::clone(&self.fetcher);

    tokio::spawn(async move {
      match fetcher.fetch(&request).await {
        Ok(response) => store_copy(storage.as_ref(), &generation, &request, &response),
        Err(e) => debug!(url = %request.url, error = %e, "background revalidation failed"),
      }
    })
  }

  fn store(&self, generation: &str, request: &Request, response: &Response) {
    store_copy(self.storage.as_ref(), generation, request, response);
  }
}

/// Write a copy of a successful response. Failures are logged and dropped;
/// the caller already has its own copy.
fn store_copy<S: CacheStorage>(storage: &S, generation: &str, request: &Request, response: &Response) {
  if !response.is_ok() {
    debug!(url = %request.url, status = response.status, "not caching unsuccessful response");
    return;
  }

  if let Err(e) = storage.put(generation, &CacheKey::for_request(request), response) {
    warn!(url = %request.url, generation, error = %e, "cache write failed");
  }
}

impl<S: CacheStorage> Clone for Strategies<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      generations: Arc::clone(&self.generations),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ResponseSource};
  use crate::testing::{ReadOnlyStorage, ScriptedFetcher};
  use url::Url;

  const APP_JS: &str = "https://quiz.example.com/js/app.js";
  const OFFLINE: &str = "https://quiz.example.com/offline.html";

  struct Harness<S: CacheStorage> {
    storage: Arc<S>,
    net: Arc<ScriptedFetcher>,
    generations: Arc<Generations>,
    strategies: Strategies<S>,
  }

  fn harness_with<S: CacheStorage>(storage: S) -> Harness<S> {
    let storage = Arc::new(storage);
    let net = Arc::new(ScriptedFetcher::new());
    let generations = Arc::new(Generations::new("quiz", "v1", true));
    let strategies = Strategies::new(
      Arc::clone(&storage),
      net.clone() as Arc<dyn Fetcher>,
      Arc::clone(&generations),
    );
    Harness {
      storage,
      net,
      generations,
      strategies,
    }
  }

  fn harness() -> Harness<MemoryStorage> {
    harness_with(MemoryStorage::new())
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn body(result: &FetchResult) -> &[u8] {
    result.response.body.as_ref()
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let h = harness();
    let req = get(APP_JS);
    h.storage
      .put(
        &h.generations.static_shell,
        &CacheKey::for_request(&req),
        &Response::new(APP_JS, 200, "shell copy"),
      )
      .unwrap();
    h.net.serve(APP_JS, "network copy");

    let result = h.strategies.cache_first(&req, CacheTarget::Runtime).await.unwrap();
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(body(&result), b"shell copy");
    assert_eq!(h.net.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_for_next_time() {
    let h = harness();
    let req = get("https://fonts.gstatic.com/font.woff2");
    h.net.serve("https://fonts.gstatic.com/font.woff2", "woff2");

    let first = h.strategies.cache_first(&req, CacheTarget::Fonts).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(h.storage.entry_count("quiz-fonts-v1").unwrap(), 1);

    h.net.set_offline(true);
    let second = h.strategies.cache_first(&req, CacheTarget::Fonts).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(body(&second), b"woff2");
  }

  #[tokio::test]
  async fn test_cache_first_miss_offline_fails() {
    let h = harness();
    h.net.set_offline(true);
    assert!(h
      .strategies
      .cache_first(&get(APP_JS), CacheTarget::Runtime)
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_network_first_stores_then_serves_offline_copy() {
    let h = harness();
    let req = get("https://abcd.supabase.co/rest/v1/quizzes");
    h.net.serve("https://abcd.supabase.co/rest/v1/quizzes", "[1,2]");

    let online = h
      .strategies
      .network_first(&req, CacheTarget::Runtime, None)
      .await
      .unwrap();
    assert_eq!(online.source, ResponseSource::Network);

    h.net.set_offline(true);
    let offline = h
      .strategies
      .network_first(&req, CacheTarget::Runtime, None)
      .await
      .unwrap();
    assert_eq!(offline.source, ResponseSource::Offline);
    assert_eq!(body(&offline), b"[1,2]");
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_offline_page() {
    let h = harness();
    let offline_req = get(OFFLINE);
    h.storage
      .put(
        &h.generations.static_shell,
        &CacheKey::for_request(&offline_req),
        &Response::new(OFFLINE, 200, "<p>You are offline</p>"),
      )
      .unwrap();
    h.net.set_offline(true);

    let req = Request::navigate(Url::parse("https://quiz.example.com/exam/42").unwrap());
    let result = h
      .strategies
      .network_first(&req, CacheTarget::Runtime, Some(&offline_req))
      .await
      .unwrap();
    assert_eq!(result.source, ResponseSource::OfflinePage);
    assert_eq!(body(&result), b"<p>You are offline</p>");
  }

  #[tokio::test]
  async fn test_network_first_without_any_fallback_fails() {
    let h = harness();
    h.net.set_offline(true);
    let req = get("https://abcd.supabase.co/rest/v1/profiles");
    assert!(h
      .strategies
      .network_first(&req, CacheTarget::Runtime, None)
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_swr_second_request_returns_first_copy() {
    let h = harness();
    let req = get(APP_JS);
    h.net.serve(APP_JS, "v1");

    let first = h
      .strategies
      .stale_while_revalidate(&req, CacheTarget::Runtime)
      .await
      .unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert!(first.revalidation.is_none());
    assert_eq!(h.storage.entry_count("quiz-runtime-v1").unwrap(), 1);

    h.net.serve(APP_JS, "v2");
    let second = h
      .strategies
      .stale_while_revalidate(&req, CacheTarget::Runtime)
      .await
      .unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(body(&second), b"v1");

    // Background refresh lands for the next request
    second.revalidation.unwrap().await.unwrap();
    let cached = h.strategies.lookup(&req).unwrap().unwrap();
    assert_eq!(cached.response.body.as_ref(), b"v2");
  }

  #[tokio::test]
  async fn test_swr_revalidation_failure_is_swallowed() {
    let h = harness();
    let req = get(APP_JS);
    h.net.serve(APP_JS, "v1");
    h.strategies
      .stale_while_revalidate(&req, CacheTarget::Runtime)
      .await
      .unwrap();

    h.net.set_offline(true);
    let mut result = h
      .strategies
      .stale_while_revalidate(&req, CacheTarget::Runtime)
      .await
      .unwrap();
    result.revalidation.take().unwrap().await.unwrap();
    assert_eq!(body(&result), b"v1");
    assert_eq!(
      h.strategies.lookup(&req).unwrap().unwrap().response.body.as_ref(),
      b"v1"
    );
  }

  #[tokio::test]
  async fn test_swr_miss_offline_fails() {
    let h = harness();
    h.net.set_offline(true);
    assert!(h
      .strategies
      .stale_while_revalidate(&get(APP_JS), CacheTarget::Runtime)
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_error_status_is_returned_not_stored() {
    let h = harness();
    let req = get("https://quiz.example.com/missing.png");

    let result = h
      .strategies
      .stale_while_revalidate(&req, CacheTarget::Runtime)
      .await
      .unwrap();
    assert_eq!(result.response.status, 404);
    assert!(h.strategies.lookup(&req).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_cache_write_failure_does_not_affect_response() {
    let h = harness_with(ReadOnlyStorage::default());
    h.net.serve(APP_JS, "fresh");

    let result = h
      .strategies
      .network_first(&get(APP_JS), CacheTarget::Runtime, None)
      .await
      .unwrap();
    assert_eq!(result.source, ResponseSource::Network);
    assert_eq!(body(&result), b"fresh");
  }

  #[tokio::test]
  async fn test_lookup_prefers_static_generation() {
    let h = harness();
    let req = get(APP_JS);
    let key = CacheKey::for_request(&req);
    h.storage
      .put(&h.generations.runtime, &key, &Response::new(APP_JS, 200, "runtime"))
      .unwrap();
    h.storage
      .put(&h.generations.static_shell, &key, &Response::new(APP_JS, 200, "static"))
      .unwrap();
    h.storage
      .put("quiz-static-v0", &key, &Response::new(APP_JS, 200, "stale deploy"))
      .unwrap();

    let cached = h.strategies.lookup(&req).unwrap().unwrap();
    assert_eq!(cached.response.body.as_ref(), b"static");
  }
}
