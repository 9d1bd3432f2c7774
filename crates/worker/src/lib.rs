//! Process glue for the ffgo worker: environment configuration and
//! one-time startup resources.

pub mod config;

use std::path::Path;
use std::sync::Arc;

use ffgo_core::job::{JobOutput, JobRequest};
use ffgo_core::workflow::WorkflowTemplate;

/// Load the bundled workflow template once for the process.
///
/// A missing or broken template is not fatal: jobs that carry their own
/// workflow still run, and template jobs fail with a clear error.
pub fn load_template(path: &Path) -> Option<Arc<WorkflowTemplate>> {
    match WorkflowTemplate::load(path) {
        Ok(template) => {
            tracing::info!(
                path = %path.display(),
                nodes = template.node_count(),
                "Loaded workflow template",
            );
            Some(Arc::new(template))
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Workflow template unavailable");
            None
        }
    }
}

/// Decode a job document, turning a malformed one into a failed output.
pub fn parse_job(text: &str) -> Result<JobRequest, JobOutput> {
    serde_json::from_str(text)
        .map_err(|e| JobOutput::failure(format!("Invalid job document: {e}")))
}
