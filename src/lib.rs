//! Rust client SDK for the cookbook assistant chat service.
//!
//! The crate is organized by transport surface:
//! - `stream`: SSE chat client delivering thinking and content channels.
//! - `api`: request/response client for the enveloped JSON API.
//! - `credentials`: bearer credential storage shared by both clients.
//! - `conversation`: in-memory conversation threads and titles.

/// Enveloped JSON API client and chat endpoints.
pub mod api;
/// Conversation threads, messages and server record folding.
pub mod conversation;
/// Bearer credential storage.
pub mod credentials;
/// Streamed chat client, transport and session.
pub mod stream;
