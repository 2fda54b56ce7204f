//! Connection-independent snapshot of a completed HTTP exchange.

use anyhow::{Context, Result, bail};
use encoding_rs::{Encoding, UTF_8};
use mime::Mime;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;

use super::error::TransportError;

/// A completed HTTP exchange.
///
/// Everything is copied out of the connection when the response is built, so a
/// `Response` stays valid after the underlying connection is reused or closed.
/// `text` and `json` are decoded independently from the same body and either
/// may be absent without the other being affected.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    url: String,
    status: u16,
    text: Option<String>,
    json: Option<Value>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    content: Option<Vec<u8>>,
}

impl Response {
    /// Creates a response with no body, headers or cookies.
    /// Fails if `status` is outside 100..=599.
    pub fn new(url: impl Into<String>, status: u16) -> Result<Self> {
        if !(100..=599).contains(&status) {
            bail!("Invalid HTTP status code: {}", status);
        }
        Ok(Self {
            url: url.into(),
            status,
            text: None,
            json: None,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            content: None,
        })
    }

    /// Attaches a raw body, decoding text (using `charset` if given) and JSON from it.
    pub fn with_body(mut self, body: Vec<u8>, charset: Option<&str>) -> Self {
        self.text = decode_text(&body, charset);
        self.json = parse_json(&body);
        self.content = Some(body);
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_cookies(mut self, cookies: HashMap<String, String>) -> Self {
        self.cookies = cookies;
        self
    }

    /// The request target as given by the caller.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// The body decoded as text, or `None` if it could not be decoded.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// The body parsed as JSON, or `None` if it is not valid JSON.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    /// Deserializes the parsed JSON body into `T`.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .json
            .as_ref()
            .with_context(|| format!("Response from {} has no JSON body", self.url))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("Failed to deserialize JSON response from {}", self.url))
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// True for 2xx statuses.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into a [`TransportError`] carrying the status,
    /// decoded body and url. A 2xx response passes through.
    pub fn raise_for_status(&self) -> Result<(), TransportError> {
        if self.is_ok() {
            return Ok(());
        }
        Err(TransportError::new(
            self.status,
            self.text.clone(),
            self.url.clone(),
        ))
    }
}

/// Extracts the `charset` parameter from a `Content-Type` value.
pub(crate) fn charset_from_content_type(content_type: &str) -> Option<String> {
    let parsed: Mime = content_type.parse().ok()?;
    let charset = parsed.get_param(mime::CHARSET)?;
    Some(charset.as_str().trim_matches('"').to_ascii_lowercase())
}

/// Decodes a body as text without replacement characters.
///
/// A byte-order mark wins over the declared charset; with neither, the body
/// must be UTF-8. Malformed input or an unknown charset label yields `None`.
fn decode_text(body: &[u8], charset: Option<&str>) -> Option<String> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(body) {
        return decode_strict(encoding, &body[bom_len..]);
    }
    let encoding = match charset {
        Some(label) => Encoding::for_label(label.trim().as_bytes())?,
        None => UTF_8,
    };
    decode_strict(encoding, body)
}

fn decode_strict(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(Cow::into_owned)
}

fn parse_json(body: &[u8]) -> Option<Value> {
    serde_json::from_slice(body).ok()
}
