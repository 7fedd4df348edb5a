//! The worker loop: drains the work queue and runs one job per message.
//!
//! A single `Worker` owns the gateways, the configuration, and the lifecycle
//! controls; the loop body is its methods. Multiple workers coordinate only
//! through the queue's visibility timeout.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use shared::config::Settings;
use shared::dto::{epoch_seconds, is_url, JobKind, JobStatus, JobTag, WorkMessage};
use shared::object_store::ObjectStore;
use shared::queue::{QueueMessage, WorkQueue};
use shared::status::merge_status;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::control::Controls;
use crate::metrics::{round2, storage_bytes, write_metrics, RusageSnapshot};

const PAUSE_SLEEP: Duration = Duration::from_secs(10);

pub struct Worker<S, Q> {
    settings: Settings,
    store: S,
    queue: Q,
    controls: Arc<Controls>,
    http: reqwest::Client,
}

impl<S, Q> Worker<S, Q>
where
    S: ObjectStore,
    Q: WorkQueue,
{
    pub fn new(settings: Settings, store: S, queue: Q, controls: Arc<Controls>) -> Self {
        Self {
            settings,
            store,
            queue,
            controls,
            http: reqwest::Client::new(),
        }
    }

    /// Polls until stopped or until the queue stays empty for the configured
    /// number of tries.
    pub async fn run(&mut self) {
        let mut empty_polls = 0u32;
        loop {
            if self.controls.stop_requested() {
                info!("worker stopping");
                break;
            }
            if self.controls.take_reload() {
                match Settings::new() {
                    Ok(settings) => {
                        info!("configuration reloaded");
                        self.settings = settings;
                    }
                    Err(err) => error!(%err, "failed to reload configuration"),
                }
            }
            if self.controls.take_help() {
                self.dump_state();
            }
            if !self.controls.processing() {
                tokio::time::sleep(PAUSE_SLEEP).await;
                continue;
            }

            match self.queue.receive(self.settings.sqs_queue_timeout).await {
                Err(err) => {
                    error!(%err, "queue receive failed");
                    tokio::time::sleep(Duration::from_secs(self.settings.sqs_retry_time)).await;
                }
                Ok(None) => {
                    empty_polls += 1;
                    if empty_polls >= self.settings.sqs_max_tries {
                        info!(tries = empty_polls, "queue stayed empty, exiting");
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(self.settings.sqs_retry_time)).await;
                }
                Ok(Some(message)) => {
                    empty_polls = 0;
                    self.process_message(message).await;
                }
            }
        }
    }

    /// Dumps the current configuration and processing gate to stderr.
    fn dump_state(&self) {
        eprintln!(
            "job-runner state: PROCESSING={} settings={:?}",
            self.controls.processing(),
            self.settings
        );
    }

    /// Executes one leased message end to end.
    pub async fn process_message(&self, message: QueueMessage) {
        let work: WorkMessage = match serde_json::from_str(&message.body) {
            Ok(work) => work,
            Err(err) => {
                error!(%err, "malformed work message, dropping");
                self.ack(&message).await;
                return;
            }
        };
        if work.job_id.is_empty() || work.job_date.is_empty() {
            error!("work message missing job id or date, dropping");
            self.ack(&message).await;
            return;
        }
        let kind = match work.job_type.parse::<JobKind>() {
            Ok(kind) => kind,
            Err(_) => {
                error!(job_type = %work.job_type, "unknown job type in work message, dropping");
                self.ack(&message).await;
                return;
            }
        };

        let tag = JobTag::new(&work.job_date, &work.job_id);
        info!(job_id = %tag.id, job_type = %work.job_type, "running job");

        let run_dir = Path::new(&self.settings.job_path).join(tag.to_string());
        if let Err(err) = tokio::fs::create_dir_all(&run_dir).await {
            // Local filesystem trouble; leave the message leased so another
            // worker picks it up.
            error!(job_id = %tag.id, %err, "failed to create working directory");
            return;
        }

        if !self.materialize_inputs(&work, &tag, &run_dir).await {
            self.finalize_failed(&tag, &work, "Failed to download input file. Job did not run.")
                .await;
            self.cleanup(&run_dir).await;
            self.ack(&message).await;
            return;
        }

        if let Err(err) = merge_status(
            &self.store,
            &self.settings.output_bucket,
            &work.job_tag,
            &work.job_type,
            |detail| detail.status = JobStatus::Running,
        )
        .await
        {
            error!(job_id = %tag.id, %err, "failed to mark job running");
        }

        // Extend the lease once so it survives the whole run; afterwards the
        // broker is free to redeliver.
        if let Some(max_run_time) = work.max_run_time {
            if let Err(err) = self
                .queue
                .extend_visibility(&message, max_run_time as i32)
                .await
            {
                error!(job_id = %tag.id, %err, "failed to extend message visibility");
            }
        }

        self.execute_tool(kind, &work, &run_dir).await;

        let uploaded = self.upload_outputs(&tag, &run_dir).await;
        let output_files = compute_output_files(&uploaded, &work.input_files, &tag);

        self.cleanup(&run_dir).await;

        if let Err(err) = merge_status(
            &self.store,
            &self.settings.output_bucket,
            &work.job_tag,
            &work.job_type,
            |detail| {
                detail.status = JobStatus::Complete;
                detail.end_time = Some(epoch_seconds());
                detail.output_files = Some(output_files.clone());
            },
        )
        .await
        {
            error!(job_id = %tag.id, %err, "failed to mark job complete");
        }
        self.ack(&message).await;
        info!(job_id = %tag.id, "job finished");
    }

    /// Downloads every input into the working directory. URLs are fetched over
    /// HTTP, keys from the input bucket. Returns false on the first failure.
    async fn materialize_inputs(&self, work: &WorkMessage, tag: &JobTag, run_dir: &Path) -> bool {
        for file in &work.input_files {
            let result = if is_url(file) {
                self.download_url(file, run_dir).await
            } else {
                let dest = Path::new(&self.settings.job_path).join(file);
                self.store
                    .download_file(&work.bucket_name, file, &dest)
                    .await
                    .map_err(anyhow::Error::from)
            };
            if let Err(err) = result {
                error!(job_id = %tag.id, %file, %err, "failed to download input file");
                return false;
            }
        }
        true
    }

    async fn download_url(&self, url: &str, run_dir: &Path) -> anyhow::Result<()> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        let dest = run_dir.join(basename(url));
        tokio::fs::write(dest, body).await?;
        Ok(())
    }

    /// Spawns the tool, captures its streams, and writes the metrics document
    /// into the working directory before anything is uploaded.
    async fn execute_tool(&self, kind: JobKind, work: &WorkMessage, run_dir: &Path) {
        let before = RusageSnapshot::now();
        let started = Instant::now();
        let exit_code = self.spawn_tool(kind, &work.command_line_args, run_dir).await;
        let runtime_in_seconds = round2(started.elapsed().as_secs_f64());
        let rusage = RusageSnapshot::now().delta(&before);
        let disk_storage_in_bytes = storage_bytes(run_dir);

        if let Err(err) = write_metrics(
            run_dir,
            kind.as_str(),
            &rusage,
            runtime_in_seconds,
            disk_storage_in_bytes,
            exit_code,
        ) {
            error!(job_id = %work.job_id, %err, "failed to write metrics document");
        }
    }

    /// Runs the binary with the argument tail, streams captured into
    /// `<kind>.stdout.txt` / `<kind>.stderr.txt`. A spawn failure is reported
    /// through the exit code; the job itself still completes.
    async fn spawn_tool(&self, kind: JobKind, cli_args: &str, run_dir: &Path) -> i64 {
        let stdout = std::fs::File::create(run_dir.join(format!("{}.stdout.txt", kind.as_str())));
        let stderr = std::fs::File::create(run_dir.join(format!("{}.stderr.txt", kind.as_str())));
        let (stdout, stderr) = match (stdout, stderr) {
            (Ok(out), Ok(err)) => (out, err),
            (Err(err), _) | (_, Err(err)) => {
                error!(%err, "failed to create capture files");
                return -1;
            }
        };

        let mut command = Command::new(kind.binary_name());
        command
            .args(cli_args.split_whitespace())
            .current_dir(run_dir)
            .stdout(stdout)
            .stderr(stderr);

        match command.spawn() {
            Ok(mut child) => match child.wait().await {
                Ok(status) => {
                    let code = status.code().map(i64::from).unwrap_or(-1);
                    if code != 0 {
                        warn!(binary = kind.binary_name(), exit_code = code, "tool exited non-zero");
                    }
                    code
                }
                Err(err) => {
                    error!(%err, binary = kind.binary_name(), "failed waiting for tool");
                    -1
                }
            },
            Err(err) => {
                error!(%err, binary = kind.binary_name(), "failed to spawn tool");
                -1
            }
        }
    }

    /// Uploads every file left in the working directory under the job prefix.
    /// Per-file failures are logged and skipped so partial outputs publish.
    async fn upload_outputs(&self, tag: &JobTag, run_dir: &Path) -> Vec<String> {
        let mut uploaded = Vec::new();
        let entries = match std::fs::read_dir(run_dir) {
            Ok(entries) => entries,
            Err(err) => {
                error!(job_id = %tag.id, %err, "failed to list working directory");
                return uploaded;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self
                .store
                .upload_file(&path, &self.settings.output_bucket, &tag.key(&name))
                .await
            {
                Ok(()) => uploaded.push(name),
                Err(err) => {
                    error!(job_id = %tag.id, file = %name, %err, "failed to upload output file")
                }
            }
        }
        uploaded
    }

    async fn finalize_failed(&self, tag: &JobTag, work: &WorkMessage, message: &str) {
        if let Err(err) = merge_status(
            &self.store,
            &self.settings.output_bucket,
            &work.job_tag,
            &work.job_type,
            |detail| {
                detail.status = JobStatus::Failed;
                detail.end_time = Some(epoch_seconds());
                detail.message = Some(message.to_string());
            },
        )
        .await
        {
            error!(job_id = %tag.id, %err, "failed to mark job failed");
        }
    }

    async fn cleanup(&self, run_dir: &Path) {
        if let Err(err) = tokio::fs::remove_dir_all(run_dir).await {
            warn!(dir = %run_dir.display(), %err, "failed to remove working directory");
        }
    }

    async fn ack(&self, message: &QueueMessage) {
        if let Err(err) = self.queue.delete(message).await {
            error!(%err, "failed to delete queue message");
        }
    }
}

/// Uploaded files that were not part of the input set, compared by basename
/// and returned as job-relative keys.
pub fn compute_output_files(
    uploaded: &[String],
    input_files: &[String],
    tag: &JobTag,
) -> Vec<String> {
    let input_basenames: HashSet<&str> = input_files.iter().map(|f| basename(f)).collect();
    uploaded
        .iter()
        .filter(|name| !input_basenames.contains(name.as_str()))
        .map(|name| tag.key(name))
        .collect()
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
