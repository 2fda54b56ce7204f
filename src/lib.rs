//! Async HTTP transport with transient-failure retries, lazy session reuse,
//! optional proxy routing and cookie persistence.

pub mod config;
pub mod http;
pub mod logging;

pub use config::ClientConfig;
pub use http::{Client, RequestOptions, Response, RetryPolicy, TransportError};
