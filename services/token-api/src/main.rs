//! Issues presigned upload URLs for a batch of job input files, minting the
//! job id and date-scoped prefix when the caller does not supply one.

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use serde_json::Value;
use shared::config::Settings;
use shared::dto::{random_job_id, JobTag, TokenRequest, TokenResponse};
use shared::object_store::{ObjectStore, S3ObjectStore};
use tracing::{error, info, warn};

const URL_EXPIRY: Duration = Duration::from_secs(3600);

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    store: Arc<S3ObjectStore>,
}

/// Builds the response for one token batch. A file whose URL cannot be signed
/// gets an empty string; the batch itself never fails.
async fn issue_tokens<S: ObjectStore + ?Sized>(
    store: &S,
    input_bucket: &str,
    request: &TokenRequest,
) -> TokenResponse {
    let job_id = request
        .job_id
        .clone()
        .unwrap_or_else(random_job_id);
    let tag = JobTag::today(job_id.clone());

    let mut urls = serde_json::Map::new();
    for file_name in &request.file_list {
        let url = match store
            .presign_put(input_bucket, &tag.key(file_name), URL_EXPIRY)
            .await
        {
            Ok(url) => url,
            Err(err) => {
                warn!(job_tag = %tag, %file_name, %err, "unable to create presigned URL");
                String::new()
            }
        };
        urls.insert(file_name.clone(), Value::String(url));
    }
    info!(job_tag = %tag, files = request.file_list.len(), "issued upload URLs");

    TokenResponse {
        date: tag.date.clone(),
        job_id,
        job_tag: tag.to_string(),
        urls,
    }
}

async fn tokens(
    state: web::Data<AppState>,
    payload: web::Json<TokenRequest>,
) -> actix_web::Result<HttpResponse> {
    let response = issue_tokens(
        state.store.as_ref(),
        &state.settings.input_bucket,
        &payload,
    )
    .await;
    Ok(HttpResponse::Ok().json(response))
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
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
    info!("starting token-api service");

    let state = AppState {
        settings: Arc::new(settings),
        store: Arc::new(S3ObjectStore::from_env().await),
    };

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(state.clone()))
            .route("/urls", web::post().to(tokens))
            .route("/health", web::get().to(health))
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
