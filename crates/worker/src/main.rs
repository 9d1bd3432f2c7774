use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ffgo_cloud::{S3ArtifactStore, S3Config};
use ffgo_pipeline::{ArtifactDelivery, Orchestrator};
use ffgo_worker::config::WorkerConfig;
use ffgo_worker::{load_template, parse_job};

/// Run one job: read `{id, input}` from the file given as the first
/// argument (or stdin), print the result document to stdout.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries the job result; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ffgo_worker=info,ffgo_pipeline=info,ffgo_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = WorkerConfig::from_env()?;
    tracing::info!(comfy_host = %config.comfy_host, "Worker starting");

    let template = load_template(&config.template_path);

    let delivery = match S3Config::from_env()? {
        Some(s3) => ArtifactDelivery::External(Arc::new(S3ArtifactStore::connect(&s3).await)),
        None => {
            tracing::info!("No bucket configured, outputs are returned inline");
            ArtifactDelivery::Inline
        }
    };

    let orchestrator = Orchestrator::new(
        &config.comfy_host,
        config.pipeline_config(),
        template,
        delivery,
    );

    let text = read_job_document(std::env::args().nth(1).map(PathBuf::from)).await?;

    let output = match parse_job(&text) {
        Ok(job) => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling job");
                    on_signal.cancel();
                }
            });

            tracing::info!(job_id = %job.id, "Processing job");
            orchestrator.run(&job, &cancel).await
        }
        Err(output) => output,
    };

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

async fn read_job_document(path: Option<PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read job document {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read job document from stdin")?;
            Ok(text)
        }
    }
}
