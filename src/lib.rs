//! Offline caching layer for progressive web apps.
//!
//! A [`worker::ServiceWorker`] installs a versioned application shell,
//! garbage-collects cache generations left by older deployments, and serves
//! intercepted requests through cache-first, network-first or
//! stale-while-revalidate strategies picked by the [`router::Router`].

pub mod cache;
pub mod config;
pub mod http;
pub mod logging;
pub mod net;
pub mod router;
pub mod shell;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod testing;
