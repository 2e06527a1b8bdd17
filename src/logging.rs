//! Tracing subscriber setup for the binary.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Filter directives for a `-v` count when neither RUST_LOG nor the config
/// sets one.
fn default_directives(verbosity: u8) -> &'static str {
  match verbosity {
    0 => "shellcache=info",
    1 => "shellcache=debug",
    _ => "shellcache=trace,reqwest=debug",
  }
}

/// Install the global subscriber: stderr always, plus a daily-rotated file
/// when a log directory is configured. Keep the returned guard alive for the
/// lifetime of the program so buffered file output gets flushed.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Result<Option<WorkerGuard>> {
  let filter = match std::env::var("RUST_LOG") {
    Ok(directives) => EnvFilter::new(directives),
    Err(_) if verbosity > 0 => EnvFilter::new(default_directives(verbosity)),
    Err(_) => EnvFilter::new(
      config
        .filter
        .as_deref()
        .unwrap_or_else(|| default_directives(0)),
    ),
  };

  let (file_layer, guard) = match &config.directory {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "shellcache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_writer(writer).with_ansi(false);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_verbosity_directives() {
    assert_eq!(default_directives(0), "shellcache=info");
    assert_eq!(default_directives(1), "shellcache=debug");
    assert!(default_directives(5).starts_with("shellcache=trace"));
  }
}
