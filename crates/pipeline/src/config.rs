use std::time::Duration;

use ffgo_comfyui::probe::ProbeConfig;
use ffgo_comfyui::reconnect::ReconnectConfig;
use ffgo_core::workflow::PatchPoints;

/// Readiness gate on a specific node class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeWait {
    /// Class name that must appear in `/object_info`.
    pub node: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl NodeWait {
    pub fn new(node: impl Into<String>, timeout: Duration) -> Self {
        Self {
            node: node.into(),
            timeout,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Knobs for one orchestrator. Defaults mirror the worker's env defaults.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub probe: ProbeConfig,
    /// `None` skips the node readiness probe.
    pub node_wait: Option<NodeWait>,
    pub reconnect: ReconnectConfig,
    /// Upper bound on the monitoring stage; `None` waits indefinitely.
    pub job_timeout: Option<Duration>,
    pub patch_points: PatchPoints,
}
