//! Status-level failure raised on request from a [`Response`](super::Response).

use thiserror::Error;

/// A completed exchange whose status was not 2xx.
///
/// Only produced by [`Response::raise_for_status`](super::Response::raise_for_status);
/// the client never returns it on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{url} returned {status}")]
pub struct TransportError {
    pub status: u16,
    pub body: Option<String>,
    pub url: String,
}

impl TransportError {
    pub fn new(status: u16, body: Option<String>, url: impl Into<String>) -> Self {
        Self {
            status,
            body,
            url: url.into(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}
