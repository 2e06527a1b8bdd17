//! Versioned cache generation names.

/// Which runtime generation a strategy writes into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTarget {
  #[default]
  Runtime,
  /// Font files; falls back to the runtime generation when no font
  /// generation is configured
  Fonts,
}

/// The current generation names for one deployment.
///
/// Names are `{prefix}-static-{version}`, `{prefix}-runtime-{version}` and
/// optionally `{prefix}-fonts-{version}`. Anything else found in storage
/// belongs to an older deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generations {
  pub static_shell: String,
  pub runtime: String,
  pub fonts: Option<String>,
}

impl Generations {
  pub fn new(prefix: &str, version: &str, with_fonts: bool) -> Self {
    Self {
      static_shell: format!("{}-static-{}", prefix, version),
      runtime: format!("{}-runtime-{}", prefix, version),
      fonts: with_fonts.then(|| format!("{}-fonts-{}", prefix, version)),
    }
  }

  /// Current names in lookup order: static, runtime, fonts.
  pub fn allow_list(&self) -> Vec<&str> {
    let mut names = vec![self.static_shell.as_str(), self.runtime.as_str()];
    if let Some(fonts) = &self.fonts {
      names.push(fonts);
    }
    names
  }

  pub fn is_current(&self, name: &str) -> bool {
    self.allow_list().contains(&name)
  }

  /// Generation a strategy with the given target writes into.
  pub fn for_target(&self, target: CacheTarget) -> &str {
    match target {
      CacheTarget::Runtime => &self.runtime,
      CacheTarget::Fonts => self.fonts.as_deref().unwrap_or(&self.runtime),
    }
  }
}
