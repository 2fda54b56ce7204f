//! HTTP client with session reuse, cookie persistence and transient-error retries.

use anyhow::{Context, Result};
use log::{debug, error};
use reqwest::Method;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use super::request::RequestOptions;
use super::response::{Response, charset_from_content_type};
use super::retry::{RetryPolicy, is_transient};
use super::session::SessionManager;
use crate::config::ClientConfig;

/// Long-lived HTTP client.
///
/// All requests share one lazily created session and one cookie jar, so
/// cookies set by one response are sent on later requests. Wrap the client in
/// an `Arc` to issue requests from several tasks.
#[derive(Debug)]
pub struct Client {
    sessions: SessionManager,
    retry: RetryPolicy,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Client {
    /// Creates a client. No connection is made until the first request.
    pub fn new(config: ClientConfig) -> Self {
        let cookie_jar = config.cookie_jar.unwrap_or_default();
        Self {
            sessions: SessionManager::new(config.proxy_url, config.timeout, cookie_jar),
            retry: config.retry,
        }
    }

    pub fn cookie_jar(&self) -> Arc<Jar> {
        Arc::clone(self.sessions.cookie_jar())
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn has_session(&self) -> bool {
        self.sessions.is_open()
    }

    /// Releases the session. Safe to call when there is none.
    pub fn close(&self) {
        self.sessions.close();
    }

    /// Ensures a session exists and returns a guard that closes it when dropped,
    /// whether the scope ends normally, through an error, a panic or cancellation.
    pub fn enter(&self) -> Result<SessionScope<'_>> {
        self.sessions.ensure_session()?;
        Ok(SessionScope { client: self })
    }

    /// Runs `f` inside [`Client::enter`]; the session is closed afterwards.
    pub async fn scoped<T, F>(&self, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&Client) -> Result<T>,
    {
        let scope = self.enter()?;
        let client: &Client = &scope;
        f(client).await
    }

    /// Sends a request, retrying connection failures and timeouts.
    ///
    /// Any status code yields a `Response`; use
    /// [`Response::raise_for_status`] to treat non-2xx as an error.
    #[tracing::instrument(skip(self, options))]
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let method = parse_method(method)?;
        options.validate()?;
        let headers = options.header_map()?;

        let operation_name = format!("{} {}", method, url);
        self.retry
            .run(&operation_name, is_transient, || {
                self.execute_once(&method, url, &headers, &options)
            })
            .await
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request("GET", url, options).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request("POST", url, options).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request("PUT", url, options).await
    }

    pub async fn patch(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request("PATCH", url, options).await
    }

    pub async fn delete(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request("DELETE", url, options).await
    }

    pub async fn head(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request("HEAD", url, options).await
    }

    /// Single attempt without retry.
    async fn execute_once(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        options: &RequestOptions,
    ) -> Result<Response> {
        let session = self.sessions.ensure_session()?;

        let mut builder = session
            .client(options.follows_redirects())
            .request(method.clone(), url)
            .headers(headers.clone());

        if !options.query_params().is_empty() {
            builder = builder.query(options.query_params());
        }
        if let Some(json) = options.json_body() {
            builder = builder.json(json);
        } else if let Some(form) = options.form_body() {
            builder = builder.form(form);
        } else if let Some(data) = options.data_body() {
            builder = builder.body(data.to_vec());
        }

        let response = builder.send().await.map_err(|e| {
            error!("Request failed: {}", e);
            e
        })?;

        let status = response.status().as_u16();
        let response_headers = snapshot_headers(response.headers());
        let cookies: HashMap<String, String> = response
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect();
        let charset = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_from_content_type);

        let body = response.bytes().await.map_err(|e| {
            error!("Request failed: {}", e);
            e
        })?;

        debug!("{} {} -> {} ({} bytes)", method, url, status, body.len());

        Ok(Response::new(url, status)?
            .with_headers(response_headers)
            .with_cookies(cookies)
            .with_body(body.to_vec(), charset.as_deref()))
    }
}

/// Keeps the client's session open for as long as it lives.
#[derive(Debug)]
pub struct SessionScope<'a> {
    client: &'a Client,
}

impl Deref for SessionScope<'_> {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client
    }
}

impl Drop for SessionScope<'_> {
    fn drop(&mut self) {
        self.client.close();
    }
}

/// Normalizes a method name to uppercase and parses it.
fn parse_method(method: &str) -> Result<Method> {
    let upper = method.trim().to_ascii_uppercase();
    Method::from_bytes(upper.as_bytes())
        .with_context(|| format!("Unsupported HTTP method: {:?}", method))
}

/// Copies headers into a plain map. Repeated names keep the last value.
fn snapshot_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
