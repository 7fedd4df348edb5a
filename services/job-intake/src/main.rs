//! Intake service: receives object-store notifications for uploaded job
//! descriptors, translates them, and feeds the work queue.

#![recursion_limit = "256"]

mod handler;
mod translator;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use serde::Serialize;
use shared::config::Settings;
use shared::dto::ObjectEvent;
use shared::object_store::S3ObjectStore;
use shared::queue::{ensure_queue, SqsWorkQueue};
use tracing::{error, info, warn};

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    store: Arc<S3ObjectStore>,
    queue: Arc<SqsWorkQueue>,
}

#[derive(Serialize)]
struct EventsResponse {
    processed: usize,
    failed: usize,
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Accepts a batch of object-store event records and interprets each one.
/// Per-record failures are logged; the batch itself always succeeds.
async fn events(
    state: web::Data<AppState>,
    payload: web::Json<ObjectEvent>,
) -> actix_web::Result<HttpResponse> {
    let mut processed = 0;
    let mut failed = 0;
    for record in &payload.records {
        let bucket = &record.s3.bucket.name;
        let key = &record.s3.object.key;
        info!(%bucket, %key, "handling descriptor event");
        match handler::interpret_job_submission(
            state.store.as_ref(),
            state.queue.as_ref(),
            &state.settings,
            bucket,
            key,
        )
        .await
        {
            Ok(()) => processed += 1,
            Err(err) => {
                error!(%bucket, %key, %err, "failed to interpret job submission");
                failed += 1;
            }
        }
    }
    Ok(HttpResponse::Ok().json(EventsResponse { processed, failed }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
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
    info!("starting job-intake service");

    let aws_config = aws_config::load_from_env().await;
    let store = Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config)));
    let sqs_client = aws_sdk_sqs::Client::new(&aws_config);
    if let Err(err) = ensure_queue(&sqs_client, &settings.job_queue_name).await {
        warn!(%err, "failed to ensure work queue (continuing)");
    }
    let queue = match SqsWorkQueue::connect(sqs_client, &settings.job_queue_name).await {
        Ok(queue) => Arc::new(queue),
        Err(err) => {
            error!(%err, queue = %settings.job_queue_name, "failed to connect to work queue");
            std::process::exit(1);
        }
    };
    info!(queue = %settings.job_queue_name, "connected to work queue");

    let state = AppState {
        settings: Arc::new(settings),
        store,
        queue,
    };

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(state.clone()))
            .route("/events", web::post().to(events))
            .route("/health", web::get().to(health))
    })
    .bind(("0.0.0.0", 8081))?
    .run()
    .await
}
