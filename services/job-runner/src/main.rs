//! Entry point for the worker that drains the job queue and executes tool
//! runs.

mod control;
mod executor;
mod metrics;

use std::sync::Arc;

use control::Controls;
use executor::Worker;
use shared::config::Settings;
use shared::object_store::S3ObjectStore;
use shared::queue::{ensure_queue, SqsWorkQueue};
use tracing::{error, info, warn};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(err) => {
            tracing_subscriber::fmt().init();
            error!(%err, "failed to load settings");
            std::process::exit(1);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(settings.env_filter())
        .init();
    info!("starting job-runner");

    let aws_config = aws_config::load_from_env().await;
    let store = S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config));
    let sqs_client = aws_sdk_sqs::Client::new(&aws_config);
    if let Err(err) = ensure_queue(&sqs_client, &settings.job_queue_name).await {
        warn!(%err, "failed to ensure work queue (continuing)");
    }
    let queue = match SqsWorkQueue::connect(sqs_client, &settings.job_queue_name).await {
        Ok(queue) => queue,
        Err(err) => {
            error!(%err, queue = %settings.job_queue_name, "failed to connect to work queue");
            std::process::exit(1);
        }
    };
    info!(queue = %settings.job_queue_name, "connected to work queue");

    let controls = Arc::new(Controls::new());
    control::install_signal_handlers(controls.clone())?;

    let mut worker = Worker::new(settings, store, queue, controls);
    worker.run().await;

    info!("job-runner exited");
    Ok(())
}
