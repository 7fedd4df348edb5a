//! Read-modify-write access to per-job status documents.
//!
//! The status document is the only user-visible failure surface of the
//! pipeline, so writes always go through [`crate::dto::StatusDoc`] to keep the
//! state-machine invariants in one place. Writes are last-writer-wins; the
//! state machine guarantees a single writer per transition.

use anyhow::{anyhow, Context};
use serde_json::Value;

use crate::dto::{StatusDetail, StatusDoc};
use crate::error::StoreError;
use crate::object_store::ObjectStore;

/// Object key of the status document for a job.
pub fn status_key(job_tag: &str, job_type: &str) -> String {
    format!("{job_tag}/{job_type}-status.json")
}

/// Serialize and store a status document in the output bucket.
pub async fn write_status<S: ObjectStore + ?Sized>(
    store: &S,
    bucket: &str,
    doc: &StatusDoc,
) -> Result<(), StoreError> {
    let key = status_key(&doc.jobtag, &doc.jobtype);
    let body = doc.to_value().to_string().into_bytes();
    store.put_bytes(bucket, &key, body).await
}

/// Read-modify-write of an existing status document.
///
/// The caller's closure mutates the per-kind detail section; the surrounding
/// fields are preserved verbatim (including reserved ones such as `subtasks`).
pub async fn merge_status<S, F>(
    store: &S,
    bucket: &str,
    job_tag: &str,
    job_type: &str,
    mutate: F,
) -> anyhow::Result<()>
where
    S: ObjectStore + ?Sized,
    F: FnOnce(&mut StatusDetail),
{
    let key = status_key(job_tag, job_type);
    let bytes = store
        .get_bytes(bucket, &key)
        .await
        .with_context(|| format!("reading status document {key}"))?;
    let value: Value =
        serde_json::from_slice(&bytes).with_context(|| format!("parsing status document {key}"))?;
    let mut doc = StatusDoc::from_value(&value)
        .ok_or_else(|| anyhow!("malformed status document at {key}"))?;
    mutate(&mut doc.detail);
    write_status(store, bucket, &doc)
        .await
        .with_context(|| format!("writing status document {key}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::{epoch_seconds, JobStatus, JobTag};
    use crate::object_store::MemoryObjectStore;

    #[tokio::test]
    async fn merge_preserves_other_fields() {
        let store = MemoryObjectStore::new();
        let tag = JobTag::new("2021-05-16", "sampleId");
        let doc = StatusDoc::initial(
            &tag,
            "apbs",
            JobStatus::Pending,
            vec![tag.key("apbsinput.in")],
            Vec::new(),
            None,
        );
        write_status(&store, "out", &doc).await.unwrap();

        merge_status(&store, "out", "2021-05-16/sampleId", "apbs", |detail| {
            detail.status = JobStatus::Complete;
            detail.end_time = Some(epoch_seconds());
            detail.output_files = Some(vec![tag.key("apbs.stdout.txt")]);
        })
        .await
        .unwrap();

        let bytes = store.get("out", "2021-05-16/sampleId/apbs-status.json").unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["apbs"]["status"], "complete");
        assert_eq!(value["jobid"], "sampleId");
        assert_eq!(value["apbs"]["subtasks"], serde_json::json!([]));
        assert!(value["apbs"]["startTime"].as_f64().is_some());
        assert!(
            value["apbs"]["endTime"].as_f64().unwrap()
                >= value["apbs"]["startTime"].as_f64().unwrap()
        );
    }

    #[tokio::test]
    async fn merge_missing_document_errors() {
        let store = MemoryObjectStore::new();
        let result = merge_status(&store, "out", "2021-05-16/ghost", "apbs", |_| {}).await;
        assert!(result.is_err());
    }
}
