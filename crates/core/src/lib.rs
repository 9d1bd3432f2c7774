//! Domain types shared by the ffgo worker crates.
//!
//! Pure logic only: job boundary types and validation, workflow
//! template handling with named patch points, and payload encoding
//! helpers. Nothing in this crate performs network I/O.

pub mod encoding;
pub mod error;
pub mod job;
pub mod workflow;
