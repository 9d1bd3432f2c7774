//! ComfyUI WebSocket and REST client library.
//!
//! Provides the HTTP API wrapper, WebSocket connection handling, typed
//! event and history parsing, availability/readiness probes, the
//! fixed-backoff reconnection procedure and the execution monitor that
//! waits for a submitted prompt to reach a terminal state.

pub mod api;
pub mod client;
pub mod history;
pub mod messages;
pub mod monitor;
pub mod probe;
pub mod reconnect;
