//! End-to-end job execution against one ComfyUI instance.
//!
//! Stages run strictly in order and the first failure ends the job:
//! validate, build the workflow, probe availability, wait for the
//! required node, upload images, open the event socket, submit, monitor,
//! collect. The socket is opened before submission so a fast engine
//! cannot finish before anyone is listening. A cancelled job never
//! reaches the engine's queue.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use ffgo_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use ffgo_comfyui::client::{ComfyUIClient, ComfyUIConnection};
use ffgo_comfyui::monitor::ExecutionMonitor;
use ffgo_comfyui::probe::{wait_for_node, wait_until_reachable};
use ffgo_core::error::CoreError;
use ffgo_core::job::{JobInput, JobOutput, JobRequest, ResultItem};
use ffgo_core::workflow::{random_seed, PatchValues, WorkflowTemplate, DEFAULT_NEGATIVE_PROMPT};

use crate::collector::{ArtifactDelivery, ResultCollector};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::uploader::AssetUploader;

/// Runs jobs against a single engine with a fixed configuration.
pub struct Orchestrator {
    api: ComfyUIApi,
    client: ComfyUIClient,
    config: PipelineConfig,
    template: Option<Arc<WorkflowTemplate>>,
    delivery: ArtifactDelivery,
}

impl Orchestrator {
    /// Build an orchestrator for the engine at `host` (`host:port`, no
    /// scheme).
    pub fn new(
        host: &str,
        config: PipelineConfig,
        template: Option<Arc<WorkflowTemplate>>,
        delivery: ArtifactDelivery,
    ) -> Self {
        Self::with_endpoints(
            ComfyUIApi::new(format!("http://{host}")),
            ComfyUIClient::new(format!("ws://{host}")),
            config,
            template,
            delivery,
        )
    }

    pub fn with_endpoints(
        api: ComfyUIApi,
        client: ComfyUIClient,
        config: PipelineConfig,
        template: Option<Arc<WorkflowTemplate>>,
        delivery: ArtifactDelivery,
    ) -> Self {
        Self {
            api,
            client,
            config,
            template,
            delivery,
        }
    }

    /// Execute one job and fold any failure into the job output.
    pub async fn run(&self, job: &JobRequest, cancel: &CancellationToken) -> JobOutput {
        match self.execute(job, cancel).await {
            Ok(output) => {
                tracing::info!(job_id = %job.id, items = output.len(), "Job completed");
                JobOutput::Success { output }
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Job failed");
                JobOutput::Failure {
                    error: e.to_string(),
                    details: e.details(),
                }
            }
        }
    }

    /// Execute one job, returning the produced artifacts.
    pub async fn execute(
        &self,
        job: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResultItem>, PipelineError> {
        let input = &job.input;
        input.validate()?;
        let workflow = self.build_workflow(input)?;

        let reachable = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            reachable = wait_until_reachable(&self.api, &self.config.probe) => reachable,
        };
        if !reachable {
            return Err(PipelineError::ServerUnreachable(self.api.api_url().to_string()));
        }

        if let Some(wait) = &self.config.node_wait {
            let ready = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                ready = wait_for_node(&self.api, &wait.node, wait.timeout, wait.poll_interval) => ready,
            };
            if !ready {
                return Err(PipelineError::NodeNotReady {
                    node: wait.node.clone(),
                    timeout_secs: wait.timeout.as_secs(),
                });
            }
        }

        ensure_active(cancel)?;
        AssetUploader::new(&self.api).upload(&input.images).await?;

        ensure_active(cancel)?;
        let client_id = uuid::Uuid::new_v4().to_string();
        let mut conn = self
            .client
            .connect(&client_id)
            .await
            .map_err(|e| PipelineError::SocketUnavailable(e.to_string()))?;

        let result = self.submit_and_monitor(&mut conn, &workflow, cancel).await;
        conn.close().await;
        let prompt_id = result?;

        ResultCollector::new(&self.api, &self.delivery)
            .collect(&prompt_id, &job.id)
            .await
    }

    /// Caller workflow verbatim, or the template patched for this job.
    fn build_workflow(&self, input: &JobInput) -> Result<Value, PipelineError> {
        if let Some(workflow) = &input.workflow {
            tracing::info!("Using caller-supplied workflow");
            return Ok(workflow.clone());
        }

        let template = self.template.as_ref().ok_or_else(|| {
            PipelineError::InvalidInput(
                "No workflow supplied and no workflow template is loaded".into(),
            )
        })?;

        let seed = input.seed.unwrap_or_else(random_seed);
        let image_names = input.image_names();
        let values = PatchValues {
            prompt: input.prompt.as_deref().unwrap_or_default(),
            negative_prompt: input
                .negative_prompt
                .as_deref()
                .unwrap_or(DEFAULT_NEGATIVE_PROMPT),
            seed,
            image_names: &image_names,
        };

        let mut workflow = template.instantiate();
        self.config
            .patch_points
            .apply(&mut workflow, &values)
            .map_err(|e| match e {
                CoreError::Validation(msg) | CoreError::Internal(msg) => {
                    PipelineError::TemplateInvalid(msg)
                }
            })?;
        tracing::info!(seed, images = image_names.len(), "Patched workflow template");
        Ok(workflow)
    }

    /// Submit on the open session and wait for the prompt to terminate.
    async fn submit_and_monitor(
        &self,
        conn: &mut ComfyUIConnection,
        workflow: &Value,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        ensure_active(cancel)?;
        let submitted = self
            .api
            .submit_workflow(workflow, &conn.client_id)
            .await
            .map_err(|e| match e {
                ComfyUIApiError::ApiError { body, .. } => PipelineError::SubmissionRejected(body),
                ComfyUIApiError::MissingField(_) => PipelineError::ProtocolMismatch(e.to_string()),
                ComfyUIApiError::Request(_) => PipelineError::SubmissionRejected(e.to_string()),
            })?;
        let prompt_id = submitted.prompt_id;
        tracing::info!(prompt_id = %prompt_id, queue_number = ?submitted.number, "Queued workflow");

        let monitor = ExecutionMonitor::new(&self.client, &self.api, self.config.reconnect);
        let monitored = match self.config.job_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, monitor.wait_for_completion(conn, &prompt_id, cancel))
                    .await
                {
                    Ok(result) => result.map_err(PipelineError::from),
                    Err(_) => Err(PipelineError::TimedOut(limit)),
                }
            }
            None => monitor
                .wait_for_completion(conn, &prompt_id, cancel)
                .await
                .map_err(PipelineError::from),
        };

        if let Err(e) = &monitored {
            if matches!(e, PipelineError::TimedOut(_) | PipelineError::Cancelled) {
                tracing::warn!(prompt_id = %prompt_id, reason = %e, "Abandoning prompt");
                self.abandon(&prompt_id).await;
            }
        }

        monitored.map(|()| prompt_id)
    }

    /// Best effort: drop the prompt from the queue and stop it if it is
    /// already running.
    async fn abandon(&self, prompt_id: &str) {
        if let Err(e) = self.api.cancel_execution(prompt_id).await {
            tracing::warn!(prompt_id = %prompt_id, error = %e, "Failed to dequeue prompt");
        }
        if let Err(e) = self.api.interrupt().await {
            tracing::warn!(prompt_id = %prompt_id, error = %e, "Failed to interrupt execution");
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}
