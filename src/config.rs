//! Client configuration.

use anyhow::{Context, Result};
use log::debug;
use reqwest::cookie::Jar;
use std::sync::Arc;
use std::time::Duration;

use crate::http::RetryPolicy;

/// Environment variable holding an upstream proxy URL.
pub const PROXY_URL_ENV: &str = "TRANSPORT_PROXY_URL";

/// Environment variable holding the total request timeout in whole seconds.
pub const TIMEOUT_SECS_ENV: &str = "TRANSPORT_TIMEOUT_SECS";

/// Total per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upstream proxy (`http://`, `https://` or `socks5://`). TLS certificates
    /// are not verified for proxied traffic.
    pub proxy_url: Option<String>,
    /// Total duration budget for one attempt, from connect to the last body byte.
    pub timeout: Duration,
    /// Pre-existing cookie store to share with the client.
    pub cookie_jar: Option<Arc<Jar>>,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            cookie_jar: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timeout_secs(self, secs: u64) -> Self {
        self.with_timeout(Duration::from_secs(secs))
    }

    pub fn with_cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds a configuration from `TRANSPORT_PROXY_URL` and `TRANSPORT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(proxy_url) = get(PROXY_URL_ENV) {
            debug!("Routing requests through proxy from {}", PROXY_URL_ENV);
            config.proxy_url = Some(proxy_url);
        }

        if let Some(secs) = get(TIMEOUT_SECS_ENV) {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} value: {:?}", TIMEOUT_SECS_ENV, secs))?;
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
