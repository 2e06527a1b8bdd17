//! Request and response snapshots exchanged between the router, the
//! strategies and the network.

use bytes::Bytes;
use reqwest::Method;
use url::Url;

/// How the request was initiated by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  /// Any sub-resource fetch (scripts, styles, XHR, images...)
  Subresource,
}

/// An intercepted request.
///
/// Only the parts the caching layer inspects are kept: the URL, the method,
/// the navigation flag and the `Accept` header. Bodies are never looked at.
#[derive(Debug, Clone)]
pub struct Request {
  pub url: Url,
  pub method: Method,
  pub mode: RequestMode,
  pub accept: Option<String>,
}

impl Request {
  /// A plain GET sub-resource request.
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: Method::GET,
      mode: RequestMode::Subresource,
      accept: None,
    }
  }

  /// A top-level navigation, as sent by a browser loading a page.
  pub fn navigate(url: Url) -> Self {
    Self {
      url,
      method: Method::GET,
      mode: RequestMode::Navigate,
      accept: Some("text/html,application/xhtml+xml".to_string()),
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
    self.accept = Some(accept.into());
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Whether the request negotiates an HTML document.
  pub fn accepts_html(&self) -> bool {
    self
      .accept
      .as_deref()
      .map(|a| a.to_ascii_lowercase().contains("text/html"))
      .unwrap_or(false)
  }

  /// Absolute URL without its fragment. Two requests with the same identity
  /// share a cache entry.
  pub fn identity(&self) -> String {
    identity_of(&self.url)
  }
}

/// Identity of a URL: the absolute form with the fragment dropped.
pub fn identity_of(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

/// A fully buffered response.
///
/// The body is read off the wire exactly once. Cloning the snapshot is how a
/// strategy keeps one copy for the caller and one for the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL the response was served from
  pub url: String,
  pub status: u16,
  pub status_text: String,
  /// Header name/value pairs in wire order
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      url: url.into(),
      status,
      status_text: reason_phrase(status).to_string(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

fn reason_phrase(status: u16) -> &'static str {
  reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("")
}
