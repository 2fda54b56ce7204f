//! Lazily created, reusable HTTP session shared by every request of one client.

use anyhow::{Context, Result};
use log::debug;
use reqwest::cookie::Jar;
use reqwest::{Client, Proxy, redirect};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Returns the User-Agent sent by every session.
pub fn user_agent() -> String {
    format!("transport-client/{}", env!("TRANSPORT_CLIENT_VERSION"))
}

/// Handle to a live session.
///
/// reqwest fixes the redirect policy per client, so a session holds two
/// clients built from the same settings: one that follows redirects and one
/// that returns 3xx responses as-is. Both share the cookie jar. Cloning is
/// cheap and a clone keeps working after the session is closed, which lets
/// in-flight requests finish.
#[derive(Debug, Clone)]
pub struct Session {
    id: u64,
    proxied: bool,
    follow_redirects: Client,
    no_redirects: Client,
}

impl Session {
    /// Process-unique identifier, increasing with creation order.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_proxied(&self) -> bool {
        self.proxied
    }

    pub(crate) fn client(&self, allow_redirects: bool) -> &Client {
        if allow_redirects {
            &self.follow_redirects
        } else {
            &self.no_redirects
        }
    }
}

/// Owns the session slot of a client.
///
/// Creation and closing both go through the same mutex, so concurrent first
/// requests converge on one session and a close never races a creation.
/// Nothing is awaited while the lock is held.
#[derive(Debug)]
pub struct SessionManager {
    proxy_url: Option<String>,
    timeout: Duration,
    cookie_jar: Arc<Jar>,
    session: Mutex<Option<Session>>,
    created: AtomicUsize,
}

impl SessionManager {
    pub fn new(proxy_url: Option<String>, timeout: Duration, cookie_jar: Arc<Jar>) -> Self {
        Self {
            proxy_url,
            timeout,
            cookie_jar,
            session: Mutex::new(None),
            created: AtomicUsize::new(0),
        }
    }

    /// Returns the live session, creating it first if there is none.
    ///
    /// Construction errors (e.g. an unparsable proxy URL) are returned as-is
    /// and leave the slot empty.
    pub fn ensure_session(&self) -> Result<Session> {
        let mut slot = self.slot();
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        let session = self.build_session()?;
        self.created.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Created HTTP session #{} ({})",
            session.id,
            if session.proxied { "proxied" } else { "direct" }
        );

        *slot = Some(session.clone());
        Ok(session)
    }

    /// Releases the session. Calling this without a session is a no-op.
    pub fn close(&self) {
        if let Some(session) = self.slot().take() {
            debug!("Closed HTTP session #{}", session.id);
        }
    }

    pub fn is_open(&self) -> bool {
        self.slot().is_some()
    }

    /// Number of sessions this manager has created over its lifetime.
    pub fn sessions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn cookie_jar(&self) -> &Arc<Jar> {
        &self.cookie_jar
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // The slot is only ever replaced wholesale, so a poisoned lock still
    // guards a consistent value.
    fn slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_session(&self) -> Result<Session> {
        Ok(Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst),
            proxied: self.proxy_url.is_some(),
            follow_redirects: self.build_client(redirect::Policy::default())?,
            no_redirects: self.build_client(redirect::Policy::none())?,
        })
    }

    fn build_client(&self, policy: redirect::Policy) -> Result<Client> {
        let builder = Client::builder()
            .user_agent(user_agent())
            .timeout(self.timeout)
            .cookie_provider(Arc::clone(&self.cookie_jar))
            .redirect(policy);

        let builder = match &self.proxy_url {
            Some(proxy_url) => {
                let proxy = Proxy::all(proxy_url.as_str())
                    .with_context(|| format!("Invalid proxy URL: {}", proxy_url))?;
                // Intercepting proxies present their own certificates
                builder.proxy(proxy).danger_accept_invalid_certs(true)
            }
            None => builder.no_proxy(),
        };

        builder.build().context("Failed to build HTTP session")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::retry::is_transient;
    use std::collections::HashSet;

    fn manager(proxy_url: Option<&str>) -> SessionManager {
        SessionManager::new(
            proxy_url.map(str::to_string),
            Duration::from_secs(5),
            Arc::new(Jar::default()),
        )
    }

    #[test]
    fn test_user_agent_format() {
        let ua = user_agent();
        assert!(ua.starts_with("transport-client/"));
        assert!(ua.len() > "transport-client/".len());
    }

    #[test]
    fn test_session_is_created_lazily() {
        let manager = manager(None);
        assert!(!manager.is_open());
        assert_eq!(manager.sessions_created(), 0);
    }

    #[test]
    fn test_ensure_session_reuses_live_session() {
        let manager = manager(None);
        let first = manager.ensure_session().unwrap();
        let second = manager.ensure_session().unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(manager.sessions_created(), 1);
        assert!(!first.is_proxied());
    }

    #[test]
    fn test_close_then_ensure_creates_new_session() {
        let manager = manager(None);
        let first = manager.ensure_session().unwrap();

        manager.close();
        assert!(!manager.is_open());

        let second = manager.ensure_session().unwrap();
        assert_ne!(first.id(), second.id());
        assert!(second.id() > first.id());
        assert_eq!(manager.sessions_created(), 2);
    }

    #[test]
    fn test_close_is_idempotent() {
        let manager = manager(None);
        manager.close();
        manager.ensure_session().unwrap();
        manager.close();
        manager.close();
        assert!(!manager.is_open());
        assert_eq!(manager.sessions_created(), 1);
    }

    #[test]
    fn test_proxied_session() {
        let manager = manager(Some("socks5://127.0.0.1:1080"));
        let session = manager.ensure_session().unwrap();
        assert!(session.is_proxied());
        assert_eq!(manager.proxy_url(), Some("socks5://127.0.0.1:1080"));
    }

    #[test]
    fn test_invalid_proxy_is_permanent_and_leaves_no_session() {
        let manager = manager(Some("http://exa mple.com"));
        let err = manager.ensure_session().unwrap_err();

        assert!(err.to_string().contains("Invalid proxy URL"));
        assert!(!is_transient(&err));
        assert!(!manager.is_open());
        assert_eq!(manager.sessions_created(), 0);
    }

    #[test]
    fn test_cookie_jar_outlives_sessions() {
        let jar = Arc::new(Jar::default());
        let manager = SessionManager::new(None, Duration::from_secs(1), Arc::clone(&jar));
        manager.ensure_session().unwrap();
        manager.close();
        assert!(Arc::ptr_eq(manager.cookie_jar(), &jar));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_creates_one_session() {
        let manager = Arc::new(manager(None));
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    manager.ensure_session().map(|s| s.id())
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap());
        }

        assert_eq!(ids.len(), 1);
        assert_eq!(manager.sessions_created(), 1);
    }
}
