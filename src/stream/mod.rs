//! Streamed chat modules.
//!
//! - `client`: request validation, URL construction and session creation.
//! - `proto`: event names, stream routes and payload extraction.
//! - `session`: one streamed reply with idle timeout and completion rules.
//! - `transport`: event-stream connection traits and the HTTP implementation.

/// Stream client, options and error types.
pub mod client;
/// Stream routes, channels and payload helpers.
pub mod proto;
/// Session that drives a single streamed reply.
pub mod session;
/// Event-stream transport boundary.
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
