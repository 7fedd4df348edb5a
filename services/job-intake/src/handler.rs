//! Interprets object-store events: reads the job descriptor, translates it,
//! publishes the initial status document, and enqueues the run.

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use shared::config::Settings;
use shared::dto::{JobKind, JobStatus, JobTag, StatusDoc, WorkMessage};
use shared::error::{StoreError, TranslateError};
use shared::object_store::ObjectStore;
use shared::queue::WorkQueue;
use shared::status::write_status;
use tracing::{error, info, warn};

use crate::translator::{self, PreparedJob};

/// Handles one descriptor-upload event.
///
/// The final three key segments are `<date>/<job_id>/<filename>`, and the
/// filename's leading token selects the tool family. Unknown families and
/// malformed descriptors produce an `invalid` status document; missing files
/// produce a `failed` one. Neither enqueues a run.
pub async fn interpret_job_submission<S, Q>(
    store: &S,
    queue: &Q,
    settings: &Settings,
    bucket: &str,
    key: &str,
) -> anyhow::Result<()>
where
    S: ObjectStore + ?Sized,
    Q: WorkQueue + ?Sized,
{
    let segments: Vec<&str> = key.split('/').collect();
    let (job_date, job_id, filename) = match segments.as_slice() {
        [.., date, id, name] => (*date, *id, *name),
        _ => bail!("descriptor key '{key}' does not match <date>/<job_id>/<filename>"),
    };
    let job_type = filename.split('-').next().unwrap_or_default().to_string();
    let tag = JobTag::new(job_date, job_id);

    let kind = match job_type.parse::<JobKind>() {
        Ok(kind) => kind,
        Err(_) => {
            error!(job_id = %tag.id, %job_type, "invalid job type");
            publish_status(
                store,
                settings,
                &tag,
                &job_type,
                JobStatus::Invalid,
                Vec::new(),
                Vec::new(),
                Some("Invalid job type. No job executed".to_string()),
            )
            .await;
            return Ok(());
        }
    };

    let bytes = match store.get_bytes(bucket, key).await {
        Ok(bytes) => bytes,
        Err(StoreError::NoSuchKey { .. }) => {
            // The event names an object that no longer exists; nothing to run.
            warn!(job_id = %tag.id, %key, "descriptor object not found");
            return Ok(());
        }
        Err(err) => return Err(err).with_context(|| format!("fetching descriptor {key}")),
    };
    let form = match parse_descriptor_form(&bytes) {
        Ok(form) => form,
        Err(err) => {
            warn!(job_id = %tag.id, %err, "malformed job descriptor");
            publish_status(
                store,
                settings,
                &tag,
                &job_type,
                JobStatus::Invalid,
                Vec::new(),
                Vec::new(),
                Some("Invalid job descriptor. No job executed".to_string()),
            )
            .await;
            return Ok(());
        }
    };

    let prepared = match translator::prepare(
        kind,
        &form,
        &tag,
        store,
        bucket,
        &settings.output_bucket,
    )
    .await
    {
        Ok(prepared) => prepared,
        Err(TranslateError::MissingFiles(missing)) => {
            warn!(job_id = %tag.id, files = ?missing, "descriptor references missing files");
            let message = format!(
                "Files specified but not found: {}. Please upload the files and resubmit the job",
                missing.join(", ")
            );
            publish_status(
                store,
                settings,
                &tag,
                &job_type,
                JobStatus::Failed,
                Vec::new(),
                Vec::new(),
                Some(message),
            )
            .await;
            return Ok(());
        }
        Err(TranslateError::InvalidDescriptor(reason)) => {
            warn!(job_id = %tag.id, %reason, "descriptor rejected");
            publish_status(
                store,
                settings,
                &tag,
                &job_type,
                JobStatus::Invalid,
                Vec::new(),
                Vec::new(),
                Some(reason),
            )
            .await;
            return Ok(());
        }
        // Transport problems are not a job outcome; leave the state machine
        // alone and let the event redeliver.
        Err(TranslateError::Store(err)) => {
            return Err(err).context("translating job descriptor");
        }
    };

    publish_status(
        store,
        settings,
        &tag,
        &job_type,
        JobStatus::Pending,
        prepared.input_files.clone(),
        prepared.output_files.clone(),
        None,
    )
    .await;

    enqueue_run(queue, settings, &tag, &job_type, bucket, &prepared).await;
    info!(job_id = %tag.id, %job_type, "job interpreted and enqueued");
    Ok(())
}

fn parse_descriptor_form(bytes: &[u8]) -> anyhow::Result<Map<String, Value>> {
    let descriptor: Value =
        serde_json::from_slice(bytes).context("descriptor is not valid JSON")?;
    descriptor
        .get("form")
        .and_then(Value::as_object)
        .cloned()
        .context("descriptor has no 'form' object")
}

#[allow(clippy::too_many_arguments)]
async fn publish_status<S: ObjectStore + ?Sized>(
    store: &S,
    settings: &Settings,
    tag: &JobTag,
    job_type: &str,
    status: JobStatus,
    input_files: Vec<String>,
    output_files: Vec<String>,
    message: Option<String>,
) {
    let doc = StatusDoc::initial(tag, job_type, status, input_files, output_files, message);
    if let Err(err) = write_status(store, &settings.output_bucket, &doc).await {
        error!(job_id = %tag.id, %err, "failed to write status document");
    }
}

async fn enqueue_run<Q: WorkQueue + ?Sized>(
    queue: &Q,
    settings: &Settings,
    tag: &JobTag,
    job_type: &str,
    bucket: &str,
    prepared: &PreparedJob,
) {
    let message = WorkMessage {
        job_date: tag.date.clone(),
        job_id: tag.id.clone(),
        job_tag: tag.to_string(),
        job_type: job_type.to_string(),
        bucket_name: bucket.to_string(),
        input_files: prepared.input_files.clone(),
        command_line_args: prepared.cli_args.clone(),
        max_run_time: Some(
            prepared
                .estimated_max_runtime
                .unwrap_or(settings.job_max_runtime),
        ),
    };
    let body = match serde_json::to_string(&message) {
        Ok(body) => body,
        Err(err) => {
            error!(job_id = %tag.id, %err, "failed to serialize work message");
            return;
        }
    };
    if let Err(err) = queue.send(&body).await {
        error!(job_id = %tag.id, %err, "failed to enqueue work message");
    }
}
