//! Availability and node-readiness probes.
//!
//! ComfyUI opens its HTTP port before custom nodes finish loading, so
//! the worker gates on two checks: the root endpoint answering, and
//! (optionally) a specific node class appearing in `/object_info`.

use std::time::Duration;

use tokio::time::Instant;

use crate::api::ComfyUIApi;

/// Bounded retry policy for the availability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Number of `GET /` attempts before giving up.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 500,
            interval: Duration::from_millis(50),
        }
    }
}

/// Poll `GET /` until it answers with a success status.
///
/// Returns `true` on the first success and `false` after exactly
/// `config.max_attempts` failed attempts. Transport errors count as a
/// failed attempt.
pub async fn wait_until_reachable(api: &ComfyUIApi, config: &ProbeConfig) -> bool {
    tracing::info!(url = %api.api_url(), max_attempts = config.max_attempts, "Checking ComfyUI availability");

    for attempt in 1..=config.max_attempts {
        match api.ping().await {
            Ok(()) => {
                tracing::info!(attempt, "ComfyUI API is reachable");
                return true;
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "ComfyUI not reachable yet");
            }
        }
        if attempt < config.max_attempts {
            tokio::time::sleep(config.interval).await;
        }
    }

    tracing::warn!(attempts = config.max_attempts, "ComfyUI API never became reachable");
    false
}

/// Poll `GET /object_info` until `node_name` is registered.
///
/// Bounded by wall-clock `timeout`; requests are spaced by
/// `poll_interval`. Returns `false` on timeout rather than an error so
/// the caller decides whether a missing node is fatal.
pub async fn wait_for_node(
    api: &ComfyUIApi,
    node_name: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match api.object_info().await {
            Ok(info) if info.get(node_name).is_some() => {
                tracing::info!(node = %node_name, attempt, "Required node is registered");
                return true;
            }
            Ok(_) => {
                tracing::debug!(node = %node_name, attempt, "Required node not registered yet");
            }
            Err(e) => {
                tracing::debug!(node = %node_name, attempt, error = %e, "object_info request failed");
            }
        }

        if Instant::now() + poll_interval > deadline {
            tracing::warn!(
                node = %node_name,
                timeout_secs = timeout.as_secs(),
                "Timed out waiting for node registration",
            );
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
