//! The application shell manifest.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use url::Url;

use crate::http::identity_of;

/// Resources needed to boot the application offline, resolved against the
/// worker scope.
#[derive(Debug, Clone)]
pub struct ShellManifest {
  /// Resolved entries in manifest order
  entries: Vec<Url>,
  /// Identities of `entries`, for O(1) membership tests
  index: HashSet<String>,
}

impl ShellManifest {
  /// Resolve relative paths (`./`, `./index.html`, `icons/192.png`...)
  /// against the scope URL.
  pub fn resolve<S: AsRef<str>>(scope: &Url, paths: &[S]) -> Result<Self> {
    let mut entries = Vec::with_capacity(paths.len());
    let mut index = HashSet::with_capacity(paths.len());

    for path in paths {
      let path = path.as_ref();
      let url = scope
        .join(path)
        .map_err(|e| eyre!("Invalid shell entry '{}': {}", path, e))?;
      // Duplicates would make the install batch write the same key twice
      if index.insert(identity_of(&url)) {
        entries.push(url);
      }
    }

    Ok(Self { entries, index })
  }

  pub fn entries(&self) -> &[Url] {
    &self.entries
  }

  /// Whether a request identity (see `Request::identity`) is part of the shell.
  pub fn contains(&self, identity: &str) -> bool {
    self.index.contains(identity)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
