//! Service worker lifecycle: install, activate, fetch and message handling.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheKey, CacheStorage, CacheTarget, FetchResult, Generations};
use crate::http::{Request, Response};
use crate::net::Fetcher;
use crate::router::{HostRule, Route, Router, Strategy};
use crate::shell::ShellManifest;
use crate::strategy::Strategies;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Registered, not installed yet (or install failed and will be retried)
  Parsed,
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  /// Activated and controlling clients
  Activated,
  /// Superseded by a newer worker
  Redundant,
}

/// Control messages posted to the worker by client pages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate a waiting worker right away
  SkipWaiting,
}

/// Identifier of an open client page.
pub type ClientId = String;

/// Everything fixed at deploy time for one worker version.
#[derive(Debug, Clone)]
pub struct WorkerProfile {
  pub scope: Url,
  pub generations: Generations,
  pub shell: ShellManifest,
  pub offline_page: Url,
  pub hosts: Vec<HostRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub generation: String,
  pub entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  /// Generations deleted because they belong to older deployments
  pub deleted: Vec<String>,
  /// Clients taken over
  pub claimed: usize,
}

/// Fetch one shell entry; anything but a 2xx response is a failure.
async fn fetch_shell_entry(fetcher: Arc<dyn Fetcher>, url: Url) -> Result<(CacheKey, Response)> {
  let request = Request::get(url);
  let response = fetcher
    .fetch(&request)
    .await
    .map_err(|e| eyre!("Failed to fetch shell entry {}: {}", request.url, e))?;

  if !response.is_ok() {
    return Err(eyre!(
      "Shell entry {} returned status {}",
      request.url,
      response.status
    ));
  }

  Ok((CacheKey::for_request(&request), response))
}

/// A service worker instance bound to one profile.
pub struct ServiceWorker<S: CacheStorage> {
  state: WorkerState,
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  generations: Arc<Generations>,
  router: Router,
  strategies: Strategies<S>,
  offline_page: Request,
  clients: BTreeSet<ClientId>,
  controlled: BTreeSet<ClientId>,
  skip_waiting: bool,
}

impl<S: CacheStorage> ServiceWorker<S> {
  pub fn new(profile: WorkerProfile, storage: Arc<S>, fetcher: Arc<dyn Fetcher>) -> Self {
    let generations = Arc::new(profile.generations);
    let strategies = Strategies::new(
      Arc::clone(&storage),
      Arc::clone(&fetcher),
      Arc::clone(&generations),
    );

    Self {
      state: WorkerState::Parsed,
      storage,
      fetcher,
      generations,
      router: Router::new(&profile.scope, profile.shell, profile.hosts),
      strategies,
      offline_page: Request::get(profile.offline_page),
      clients: BTreeSet::new(),
      controlled: BTreeSet::new(),
      skip_waiting: false,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn generations(&self) -> &Generations {
    &self.generations
  }

  pub fn router(&self) -> &Router {
    &self.router
  }

  /// Fetch every shell entry and store them in the static generation.
  ///
  /// All entries are fetched before anything is written. A single network
  /// failure or non-success status fails the whole install and leaves the
  /// static generation untouched; the worker goes back to `Parsed` so the
  /// install can be retried.
  pub async fn install(&mut self) -> Result<InstallReport> {
    if self.state != WorkerState::Parsed {
      return Err(eyre!("Cannot install a worker in state {:?}", self.state));
    }
    self.state = WorkerState::Installing;

    match self.add_all_shell_entries().await {
      Ok(report) => {
        self.state = WorkerState::Installed;
        info!(
          generation = %report.generation,
          entries = report.entries,
          "shell installed"
        );
        if self.skip_waiting {
          // The shell is written either way; a failed activation leaves the
          // worker waiting
          if let Err(e) = self.activate().await {
            warn!(error = %e, "activation after install failed");
          }
        }
        Ok(report)
      }
      Err(e) => {
        self.state = WorkerState::Parsed;
        warn!(error = %e, "shell install failed");
        Err(e)
      }
    }
  }

  async fn add_all_shell_entries(&self) -> Result<InstallReport> {
    let generation = self.generations.static_shell.clone();
    self.storage.open_generation(&generation)?;

    let fetches = self
      .router
      .shell()
      .entries()
      .iter()
      .map(|url| fetch_shell_entry(Arc::clone(&self.fetcher), url.clone()));

    let entries = try_join_all(fetches).await?;
    self.storage.put_all(&generation, &entries)?;

    Ok(InstallReport {
      generation,
      entries: entries.len(),
    })
  }

  /// Pick up a shell installed by an earlier process.
  ///
  /// Succeeds only when the static generation holds every shell entry;
  /// otherwise the install has to run again.
  pub fn resume_installed(&mut self) -> Result<()> {
    if self.state != WorkerState::Parsed {
      return Err(eyre!("Cannot resume a worker in state {:?}", self.state));
    }
    self.ensure_shell_installed()?;

    self.state = WorkerState::Installed;
    Ok(())
  }

  /// Pick up a worker that an earlier process already activated.
  ///
  /// Checks the shell like `resume_installed` but does not garbage-collect:
  /// generations of other versions, including a newer one still waiting,
  /// stay where they are.
  pub fn resume_activated(&mut self) -> Result<()> {
    if self.state != WorkerState::Parsed {
      return Err(eyre!("Cannot resume a worker in state {:?}", self.state));
    }
    self.ensure_shell_installed()?;

    self.claim();
    self.state = WorkerState::Activated;
    Ok(())
  }

  fn ensure_shell_installed(&self) -> Result<()> {
    for url in self.router.shell().entries() {
      let key = CacheKey::for_request(&Request::get(url.clone()));
      if self
        .storage
        .get(&self.generations.static_shell, &key)?
        .is_none()
      {
        return Err(eyre!(
          "Shell entry {} missing from {}; run install first",
          url,
          self.generations.static_shell
        ));
      }
    }
    Ok(())
  }

  /// Delete every generation that is not current, then claim all clients.
  pub async fn activate(&mut self) -> Result<ActivationReport> {
    if self.state != WorkerState::Installed {
      return Err(eyre!("Cannot activate a worker in state {:?}", self.state));
    }
    self.state = WorkerState::Activating;

    let deleted = match self.delete_stale_generations() {
      Ok(deleted) => deleted,
      Err(e) => {
        self.state = WorkerState::Installed;
        return Err(e);
      }
    };

    let claimed = self.claim();
    self.state = WorkerState::Activated;
    info!(deleted = ?deleted, claimed, "worker activated");

    Ok(ActivationReport { deleted, claimed })
  }

  fn delete_stale_generations(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.generation_names()? {
      if self.generations.is_current(&name) {
        continue;
      }
      if self.storage.delete_generation(&name)? {
        debug!(generation = %name, "deleted stale generation");
        deleted.push(name);
      }
    }
    Ok(deleted)
  }

  /// Take control of every open client without waiting for a reload.
  fn claim(&mut self) -> usize {
    self.controlled = self.clients.clone();
    self.controlled.len()
  }

  /// Handle a raw JSON message posted by a client page.
  ///
  /// Unknown or malformed messages are logged and ignored.
  pub async fn handle_message(&mut self, raw: &str) -> Result<()> {
    match serde_json::from_str::<ControlMessage>(raw) {
      Ok(message) => self.dispatch_message(message).await,
      Err(e) => {
        debug!(raw, error = %e, "ignoring unrecognised message");
        Ok(())
      }
    }
  }

  pub async fn dispatch_message(&mut self, message: ControlMessage) -> Result<()> {
    match message {
      ControlMessage::SkipWaiting => {
        self.skip_waiting = true;
        if self.state == WorkerState::Installed {
          self.activate().await?;
        }
        Ok(())
      }
    }
  }

  /// Register an open client page. Once activated, new clients are
  /// controlled immediately.
  pub fn register_client(&mut self, id: impl Into<ClientId>) {
    let id = id.into();
    if self.state == WorkerState::Activated {
      self.controlled.insert(id.clone());
    }
    self.clients.insert(id);
  }

  pub fn unregister_client(&mut self, id: &str) {
    self.clients.remove(id);
    self.controlled.remove(id);
  }

  pub fn controls(&self, id: &str) -> bool {
    self.controlled.contains(id)
  }

  /// Mark this worker as replaced by a newer one. It stops intercepting.
  pub fn supersede(&mut self) {
    self.state = WorkerState::Redundant;
    self.controlled.clear();
  }

  /// Routing decision for a request, without any I/O.
  pub fn route(&self, request: &Request) -> Route {
    self.router.classify(request)
  }

  /// Handle an intercepted request.
  ///
  /// Returns `None` when the worker does not intercept it (not activated, or
  /// routed to passthrough); the host then performs the request natively.
  pub async fn handle_fetch(&self, request: &Request) -> Option<Result<FetchResult>> {
    if self.state != WorkerState::Activated {
      return None;
    }

    let route = self.route(request);
    debug!(url = %request.url, ?route, "routing request");

    let result = match route {
      Route::Passthrough => return None,
      // Same fallback chain for page loads and same-origin HTML fetches
      Route::Navigation | Route::HtmlNetworkFirst => {
        self
          .strategies
          .network_first(request, CacheTarget::Runtime, Some(&self.offline_page))
          .await
      }
      Route::ShellCacheFirst => {
        self
          .strategies
          .cache_first(request, CacheTarget::Runtime)
          .await
      }
      Route::StaleWhileRevalidate => {
        self
          .strategies
          .stale_while_revalidate(request, CacheTarget::Runtime)
          .await
      }
      Route::CrossOrigin { strategy, target } => match strategy {
        Strategy::CacheFirst => self.strategies.cache_first(request, target).await,
        Strategy::NetworkFirst => self.strategies.network_first(request, target, None).await,
        Strategy::StaleWhileRevalidate => {
          self
            .strategies
            .stale_while_revalidate(request, target)
            .await
        }
      },
    };

    Some(result)
  }
}
