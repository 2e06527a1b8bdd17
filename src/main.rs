use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use shellcache::cache::{CacheStorage, SqliteStorage};
use shellcache::config::Config;
use shellcache::http::Request;
use shellcache::net::{Disconnected, Fetcher, HttpFetcher};
use shellcache::worker::ServiceWorker;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline caching layer for progressive web apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache database to use instead of the configured one
  #[arg(short, long)]
  database: Option<PathBuf>,

  /// Increase log verbosity (-v debug, -vv trace)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch the shell manifest into the static generation
  Install,
  /// Delete cache generations left by older deployments
  Activate,
  /// Install, send SKIP_WAITING and activate in one go
  Update,
  /// Print how a request would be routed, without any I/O
  Route {
    url: String,
    /// Treat the request as a top-level page load
    #[arg(long)]
    navigate: bool,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    /// HTTP method
    #[arg(long, default_value = "GET")]
    method: String,
  },
  /// Run a request through the activated worker
  Fetch {
    url: String,
    /// Treat the request as a top-level page load
    #[arg(long)]
    navigate: bool,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    /// Simulate a disconnected network
    #[arg(long)]
    offline: bool,
  },
  /// List cache generations and their entry counts
  Caches,
}

fn build_request(url: &str, navigate: bool, accept: Option<String>) -> Result<Request> {
  let url = Url::parse(url).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
  let mut request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };
  if let Some(accept) = accept {
    request = request.with_accept(accept);
  }
  Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = shellcache::logging::init(&config.logging, args.verbose)?;

  let profile = config.worker_profile()?;
  let database = args.database.or_else(|| config.storage.database.clone());
  let storage = Arc::new(SqliteStorage::open(database.as_deref())?);

  let offline = matches!(args.command, Command::Fetch { offline: true, .. });
  let fetcher: Arc<dyn Fetcher> = if offline {
    Arc::new(Disconnected)
  } else {
    Arc::new(HttpFetcher::new(config.client_slot()))
  };

  let mut worker = ServiceWorker::new(profile, Arc::clone(&storage), fetcher);

  match args.command {
    Command::Install => {
      let report = worker.install().await?;
      println!("installed {} entries into {}", report.entries, report.generation);
    }
    Command::Activate => {
      worker.resume_installed()?;
      let report = worker.activate().await?;
      for name in &report.deleted {
        println!("deleted {}", name);
      }
      println!("{} stale generation(s) deleted", report.deleted.len());
    }
    Command::Update => {
      let report = worker.install().await?;
      println!("installed {} entries into {}", report.entries, report.generation);
      worker.handle_message(r#"{"type":"SKIP_WAITING"}"#).await?;
      println!("worker {:?}", worker.state());
    }
    Command::Route {
      url,
      navigate,
      accept,
      method,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let request = build_request(&url, navigate, accept)?.with_method(method);
      println!("{:?}", worker.route(&request));
    }
    Command::Fetch {
      url,
      navigate,
      accept,
      ..
    } => {
      let request = build_request(&url, navigate, accept)?;
      // Serve through the live deployment; garbage collection belongs to activate
      worker.resume_activated()?;
      match worker.handle_fetch(&request).await {
        None => println!("not intercepted: {:?}", worker.route(&request)),
        Some(result) => {
          let mut result = result?;
          println!(
            "{} {} via {} ({} bytes)",
            result.response.status,
            result.response.status_text,
            result.source,
            result.response.body.len()
          );
          if let Some(handle) = result.revalidation.take() {
            // Let the background refresh finish before the process exits
            let _ = handle.await;
          }
        }
      }
    }
    Command::Caches => {
      let current = worker.generations().allow_list();
      for name in storage.generation_names()? {
        let marker = if current.contains(&name.as_str()) {
          "current"
        } else {
          "stale"
        };
        println!("{:<40} {:>6} entries  {}", name, storage.entry_count(&name)?, marker);
      }
    }
  }

  Ok(())
}
