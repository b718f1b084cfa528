//! HTTP delivery for upload queues.
//!
//! `HttpTransport` posts a batch as a JSON array and retries transient
//! failures with exponential backoff before giving up.

mod sender;

pub use sender::{HttpTransport, SenderConfig};
