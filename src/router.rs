//! Request classification.
//!
//! Routing is a pure function of the request and the worker profile. It
//! never touches the cache or the network, so every decision can be tested
//! on its own.

use reqwest::Method;
use serde::Deserialize;
use url::{Origin, Url};

use crate::cache::CacheTarget;
use crate::http::Request;
use crate::shell::ShellManifest;

/// Caching strategy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

/// Hostname predicate for a cross-origin rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum HostPattern {
  /// Matches the host exactly
  Exact(String),
  /// Matches the domain and any subdomain of it (written `*.domain`)
  Suffix(String),
}

impl From<String> for HostPattern {
  fn from(s: String) -> Self {
    let s = s.trim().to_ascii_lowercase();
    match s.strip_prefix("*.") {
      Some(domain) => Self::Suffix(domain.to_string()),
      None => Self::Exact(s),
    }
  }
}

impl From<&str> for HostPattern {
  fn from(s: &str) -> Self {
    Self::from(s.to_string())
  }
}

impl HostPattern {
  pub fn matches(&self, host: &str) -> bool {
    match self {
      Self::Exact(h) => host.eq_ignore_ascii_case(h),
      Self::Suffix(domain) => {
        let host = host.to_ascii_lowercase();
        host == *domain
          || host
            .strip_suffix(domain.as_str())
            .is_some_and(|rest| rest.ends_with('.'))
      }
    }
  }
}

/// One entry of the cross-origin host table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostRule {
  #[serde(rename = "host")]
  pub pattern: HostPattern,
  pub strategy: Strategy,
  #[serde(default)]
  pub target: CacheTarget,
}

impl HostRule {
  pub fn new(pattern: impl Into<HostPattern>, strategy: Strategy) -> Self {
    Self {
      pattern: pattern.into(),
      strategy,
      target: CacheTarget::Runtime,
    }
  }

  pub fn with_target(mut self, target: CacheTarget) -> Self {
    self.target = target;
    self
  }
}

/// Known CDN, font and backend hosts.
pub fn default_host_rules() -> Vec<HostRule> {
  vec![
    HostRule::new("cdn.jsdelivr.net", Strategy::StaleWhileRevalidate),
    HostRule::new("cdnjs.cloudflare.com", Strategy::StaleWhileRevalidate),
    HostRule::new("unpkg.com", Strategy::StaleWhileRevalidate),
    HostRule::new("fonts.googleapis.com", Strategy::StaleWhileRevalidate),
    HostRule::new("fonts.gstatic.com", Strategy::CacheFirst).with_target(CacheTarget::Fonts),
    HostRule::new("*.supabase.co", Strategy::NetworkFirst),
  ]
}

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted; the request goes to the network untouched
  Passthrough,
  /// Page load: network first, then cached copy, then offline page
  Navigation,
  /// Same-origin shell resource: cache first
  ShellCacheFirst,
  /// Same-origin HTML sub-request: network first with offline page
  HtmlNetworkFirst,
  /// Any other same-origin request
  StaleWhileRevalidate,
  /// Cross-origin request, strategy taken from the host table
  CrossOrigin {
    strategy: Strategy,
    target: CacheTarget,
  },
}

/// Classifies intercepted requests.
#[derive(Debug, Clone)]
pub struct Router {
  origin: Origin,
  shell: ShellManifest,
  hosts: Vec<HostRule>,
}

impl Router {
  pub fn new(scope: &Url, shell: ShellManifest, hosts: Vec<HostRule>) -> Self {
    Self {
      origin: scope.origin(),
      shell,
      hosts,
    }
  }

  pub fn shell(&self) -> &ShellManifest {
    &self.shell
  }

  pub fn classify(&self, request: &Request) -> Route {
    if request.method != Method::GET {
      return Route::Passthrough;
    }

    if !matches!(request.url.scheme(), "http" | "https") {
      return Route::Passthrough;
    }

    // Navigations never take the shell shortcut
    if request.is_navigation() {
      return Route::Navigation;
    }

    if request.url.origin() == self.origin {
      if self.shell.contains(&request.identity()) {
        return Route::ShellCacheFirst;
      }
      if request.accepts_html() {
        return Route::HtmlNetworkFirst;
      }
      return Route::StaleWhileRevalidate;
    }

    let rule = request
      .url
      .host_str()
      .and_then(|host| self.hosts.iter().find(|rule| rule.pattern.matches(host)));

    match rule {
      Some(rule) => Route::CrossOrigin {
        strategy: rule.strategy,
        target: rule.target,
      },
      None => Route::CrossOrigin {
        strategy: Strategy::StaleWhileRevalidate,
        target: CacheTarget::Runtime,
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn router() -> Router {
    let scope = Url::parse("https://quiz.example.com/").unwrap();
    let shell =
      ShellManifest::resolve(&scope, &["./", "./index.html", "./dashboard.html", "./offline.html"])
        .unwrap();
    Router::new(&scope, shell, default_host_rules())
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_non_get_is_never_intercepted() {
    let r = router();
    for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD] {
      let req = get("https://quiz.example.com/dashboard.html").with_method(method);
      assert_eq!(r.classify(&req), Route::Passthrough);
    }
    let nav = Request::navigate(Url::parse("https://quiz.example.com/").unwrap())
      .with_method(Method::POST);
    assert_eq!(r.classify(&nav), Route::Passthrough);
  }

  #[test]
  fn test_navigation_takes_precedence_over_shell() {
    let req = Request::navigate(Url::parse("https://quiz.example.com/dashboard.html").unwrap());
    assert_eq!(router().classify(&req), Route::Navigation);
  }

  #[test]
  fn test_same_origin_routes() {
    let r = router();
    assert_eq!(
      r.classify(&get("https://quiz.example.com/dashboard.html")),
      Route::ShellCacheFirst
    );
    assert_eq!(
      r.classify(&get("https://quiz.example.com/dashboard.html#results")),
      Route::ShellCacheFirst
    );
    assert_eq!(
      r.classify(&get("https://quiz.example.com/exam.html").with_accept("text/html")),
      Route::HtmlNetworkFirst
    );
    assert_eq!(
      r.classify(&get("https://quiz.example.com/js/exam.js")),
      Route::StaleWhileRevalidate
    );
  }

  #[test]
  fn test_cross_origin_host_table() {
    let r = router();
    assert_eq!(
      r.classify(&get("https://fonts.gstatic.com/font.woff2")),
      Route::CrossOrigin {
        strategy: Strategy::CacheFirst,
        target: CacheTarget::Fonts
      }
    );
    assert_eq!(
      r.classify(&get("https://abcd.supabase.co/rest/v1/quizzes")),
      Route::CrossOrigin {
        strategy: Strategy::NetworkFirst,
        target: CacheTarget::Runtime
      }
    );
    assert_eq!(
      r.classify(&get("https://cdn.jsdelivr.net/npm/chart.js")),
      Route::CrossOrigin {
        strategy: Strategy::StaleWhileRevalidate,
        target: CacheTarget::Runtime
      }
    );
  }

  #[test]
  fn test_unknown_cross_origin_defaults_to_swr() {
    assert_eq!(
      router().classify(&get("https://images.example.net/logo.png")),
      Route::CrossOrigin {
        strategy: Strategy::StaleWhileRevalidate,
        target: CacheTarget::Runtime
      }
    );
  }

  #[test]
  fn test_other_port_is_cross_origin() {
    assert!(matches!(
      router().classify(&get("https://quiz.example.com:8443/dashboard.html")),
      Route::CrossOrigin { .. }
    ));
  }

  #[test]
  fn test_non_http_scheme_passes_through() {
    assert_eq!(
      router().classify(&get("chrome-extension://abc/script.js")),
      Route::Passthrough
    );
  }

  #[test]
  fn test_host_patterns() {
    let suffix = HostPattern::from("*.supabase.co");
    assert!(suffix.matches("abcd.supabase.co"));
    assert!(suffix.matches("supabase.co"));
    assert!(!suffix.matches("evilsupabase.co"));

    let exact = HostPattern::from("Fonts.GStatic.com");
    assert!(exact.matches("fonts.gstatic.com"));
    assert!(!exact.matches("x.fonts.gstatic.com"));
  }

  #[test]
  fn test_host_rule_from_yaml() {
    let rules: Vec<HostRule> = serde_yaml::from_str(
      "- host: '*.supabase.co'\n  strategy: network-first\n- host: fonts.gstatic.com\n  strategy: cache-first\n  target: fonts\n",
    )
    .unwrap();
    assert_eq!(rules[0].pattern, HostPattern::Suffix("supabase.co".into()));
    assert_eq!(rules[1].target, CacheTarget::Fonts);
  }
}
