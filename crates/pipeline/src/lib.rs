//! Job pipeline for the ffgo worker.
//!
//! Ties the ComfyUI client pieces into one sequential run per job:
//! [`orchestrator::Orchestrator`] drives upload, submission, monitoring
//! and collection, and folds every failure into a
//! [`ffgo_core::job::JobOutput`].

pub mod collector;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod uploader;

pub use collector::ArtifactDelivery;
pub use config::{NodeWait, PipelineConfig};
pub use error::PipelineError;
pub use orchestrator::Orchestrator;
