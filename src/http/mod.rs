//! HTTP transport: session management, retries, request execution and the
//! response/error model.

mod client;
mod error;
mod request;
mod response;
mod retry;
mod session;

pub use client::{Client, SessionScope};
pub use error::TransportError;
pub use request::RequestOptions;
pub use response::Response;
pub use retry::{MAX_ATTEMPTS, RETRY_DELAY_MS, RetryPolicy, is_transient};
pub use session::{Session, SessionManager, user_agent};
