//! Per-request options.

use anyhow::{Context, Result, bail};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;

/// Options for a single request: headers, body, query parameters and
/// redirect handling. Headers and body are passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    data: Option<Vec<u8>>,
    form: Option<Vec<(String, String)>>,
    json: Option<Value>,
    params: Vec<(String, String)>,
    allow_redirects: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            data: None,
            form: None,
            json: None,
            params: Vec::new(),
            allow_redirects: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Raw request body.
    pub fn data(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.data = Some(body.into());
        self
    }

    /// URL-encoded form body; sets `Content-Type: application/x-www-form-urlencoded`
    /// when sent. Repeated calls append fields.
    pub fn form<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.form
            .get_or_insert_with(Vec::new)
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// JSON request body; sets `Content-Type: application/json` when sent.
    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    /// JSON request body from any serializable value.
    pub fn json_from<T: Serialize + ?Sized>(self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body).context("Failed to serialize JSON request body")?;
        Ok(self.json(value))
    }

    /// Appends one query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = allow;
        self
    }

    pub fn header_pairs(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn data_body(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn form_body(&self) -> Option<&[(String, String)]> {
        self.form.as_deref()
    }

    pub fn json_body(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn query_params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn follows_redirects(&self) -> bool {
        self.allow_redirects
    }

    /// Checks everything that can be rejected before touching the network.
    pub(crate) fn validate(&self) -> Result<()> {
        let bodies = [self.data.is_some(), self.form.is_some(), self.json.is_some()];
        if bodies.iter().filter(|set| **set).count() > 1 {
            bail!("data, form and json parameters can not be used at the same time");
        }
        Ok(())
    }

    /// Converts the header pairs into a `HeaderMap`, keeping repeated names.
    pub(crate) fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {:?}", name))?;
            let header_value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {}", name))?;
            map.append(header_name, header_value);
        }
        Ok(map)
    }
}
