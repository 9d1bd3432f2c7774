use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ffgo_comfyui::probe::ProbeConfig;
use ffgo_comfyui::reconnect::ReconnectConfig;
use ffgo_pipeline::{NodeWait, PipelineConfig};

/// A malformed environment value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a valid {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// ComfyUI `host:port`, no scheme.
    pub comfy_host: String,
    pub probe: ProbeConfig,
    pub reconnect: ReconnectConfig,
    /// Node class that must be registered before jobs run.
    pub required_node: Option<String>,
    pub node_wait_timeout: Duration,
    pub job_timeout: Option<Duration>,
    pub template_path: PathBuf,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default               |
    /// |-----------------------------------|-----------------------|
    /// | `COMFY_HOST`                      | `127.0.0.1:8188`      |
    /// | `COMFY_API_AVAILABLE_MAX_RETRIES` | `500`                 |
    /// | `COMFY_API_AVAILABLE_INTERVAL_MS` | `50`                  |
    /// | `WEBSOCKET_RECONNECT_ATTEMPTS`    | `5`                   |
    /// | `WEBSOCKET_RECONNECT_DELAY_S`     | `3`                   |
    /// | `REQUIRED_NODE`                   | unset                 |
    /// | `NODE_WAIT_TIMEOUT_SECS`          | `120`                 |
    /// | `JOB_TIMEOUT_SECS`                | unset                 |
    /// | `WORKFLOW_TEMPLATE_PATH`          | `/workflow_ffgo.json` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let comfy_host = lookup("COMFY_HOST").unwrap_or_else(|| "127.0.0.1:8188".into());

        let probe = ProbeConfig {
            max_attempts: parse_or(&lookup, "COMFY_API_AVAILABLE_MAX_RETRIES", 500u32)?,
            interval: Duration::from_millis(parse_or(
                &lookup,
                "COMFY_API_AVAILABLE_INTERVAL_MS",
                50u64,
            )?),
        };

        let reconnect = ReconnectConfig {
            max_attempts: parse_or(&lookup, "WEBSOCKET_RECONNECT_ATTEMPTS", 5u32)?,
            delay: Duration::from_secs(parse_or(&lookup, "WEBSOCKET_RECONNECT_DELAY_S", 3u64)?),
        };

        let node_wait_timeout =
            Duration::from_secs(parse_or(&lookup, "NODE_WAIT_TIMEOUT_SECS", 120u64)?);

        let job_timeout = lookup("JOB_TIMEOUT_SECS")
            .map(|v| parse_value::<u64>("JOB_TIMEOUT_SECS", v))
            .transpose()?
            .map(Duration::from_secs);

        let template_path = lookup("WORKFLOW_TEMPLATE_PATH")
            .unwrap_or_else(|| "/workflow_ffgo.json".into())
            .into();

        Ok(Self {
            comfy_host,
            probe,
            reconnect,
            required_node: lookup("REQUIRED_NODE"),
            node_wait_timeout,
            job_timeout,
            template_path,
        })
    }

    /// Pipeline settings derived from this configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            probe: self.probe,
            node_wait: self
                .required_node
                .as_ref()
                .map(|node| NodeWait::new(node.clone(), self.node_wait_timeout)),
            reconnect: self.reconnect,
            job_timeout: self.job_timeout,
            ..Default::default()
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => parse_value(key, value),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        expected: std::any::type_name::<T>(),
        value,
    })
}
