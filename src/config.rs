use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::Generations;
use crate::net::ClientSlot;
use crate::router::{default_host_rules, HostRule};
use crate::shell::ShellManifest;
use crate::worker::WorkerProfile;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub app: AppConfig,
  /// Cross-origin host table (defaults to the known CDN, font and backend hosts)
  #[serde(default = "default_host_rules")]
  pub cross_origin: Vec<HostRule>,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// URL the worker is served from; shell paths resolve against it
  pub scope: String,
  /// Deployment version suffix, e.g. "v1"
  pub version: String,
  /// Generation name prefix
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// Keep font files in their own generation
  #[serde(default)]
  pub font_cache: bool,
  /// Page served when a navigation fails and nothing is cached. Must be
  /// part of the shell.
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  /// Shell manifest, relative to `scope`
  pub shell: Vec<String>,
}

fn default_prefix() -> String {
  "app".to_string()
}

fn default_offline_page() -> String {
  "./offline.html".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Cache database path (default: $XDG_DATA_HOME/shellcache/cache.db)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  pub user_agent: Option<String>,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
      user_agent: None,
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
  /// Filter directives used when RUST_LOG is not set (e.g. "shellcache=debug")
  pub filter: Option<String>,
  /// Also write daily-rotated logs into this directory
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shellcache/config.yaml\n\
                 See shellcache.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Resolve the deploy-time settings into a worker profile.
  pub fn worker_profile(&self) -> Result<WorkerProfile> {
    let app = &self.app;

    let scope = Url::parse(&app.scope)
      .map_err(|e| eyre!("Invalid scope URL '{}': {}", app.scope, e))?;
    if app.version.trim().is_empty() {
      return Err(eyre!("Version must not be empty"));
    }

    let shell = ShellManifest::resolve(&scope, app.shell.as_slice())?;
    let offline_page = scope
      .join(&app.offline_page)
      .map_err(|e| eyre!("Invalid offline page '{}': {}", app.offline_page, e))?;
    if !shell.contains(&crate::http::identity_of(&offline_page)) {
      return Err(eyre!(
        "Offline page {} is not part of the shell manifest",
        offline_page
      ));
    }

    Ok(WorkerProfile {
      generations: Generations::new(&app.prefix, &app.version, app.font_cache),
      shell,
      offline_page,
      hosts: self.cross_origin.clone(),
      scope,
    })
  }

  /// Shared HTTP client slot built from the network settings.
  pub fn client_slot(&self) -> ClientSlot {
    match &self.network.user_agent {
      Some(ua) => ClientSlot::new(Duration::from_secs(self.network.timeout_secs), ua.clone()),
      None => ClientSlot::new(
        Duration::from_secs(self.network.timeout_secs),
        concat!("shellcache/", env!("CARGO_PKG_VERSION")),
      ),
    }
  }
}
