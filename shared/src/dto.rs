//! Defines the job data model exchanged between the intake handler, the work
//! queue, and the worker so serialization stays consistent across the
//! pipeline.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::{Display, EnumString};

/// The tool family a job invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Apbs,
    Pdb2pqr,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Apbs => "apbs",
            JobKind::Pdb2pqr => "pdb2pqr",
        }
    }

    /// Name of the executable the worker spawns for this kind.
    pub fn binary_name(&self) -> &'static str {
        match self {
            JobKind::Apbs => "apbs",
            JobKind::Pdb2pqr => "pdb2pqr30",
        }
    }
}

/// The `<date>/<job_id>` prefix that owns every artifact of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTag {
    pub date: String,
    pub id: String,
}

impl JobTag {
    pub fn new(date: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            id: id.into(),
        }
    }

    /// Tag for a job submitted today (UTC), used when minting new ids.
    pub fn today(id: impl Into<String>) -> Self {
        Self::new(Utc::now().format("%Y-%m-%d").to_string(), id)
    }

    /// Object key for a file under this job's prefix.
    pub fn key(&self, file_name: &str) -> String {
        format!("{}/{}/{}", self.date, self.id, file_name)
    }
}

impl std::fmt::Display for JobTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.date, self.id)
    }
}

/// Random 10-character job id drawn from `[a-z0-9]`.
pub fn random_job_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..10)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Returns true when the string is an absolute URL rather than an object key.
pub fn is_url(file_name: &str) -> bool {
    url::Url::parse(file_name).is_ok()
}

/// Seconds since the Unix epoch, fractional.
pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// The JSON body of a work-queue message, consumed by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkMessage {
    pub job_date: String,
    pub job_id: String,
    pub job_tag: String,
    pub job_type: String,
    pub bucket_name: String,
    pub input_files: Vec<String>,
    pub command_line_args: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_run_time: Option<u64>,
}

/// Lifecycle states of a job's status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Invalid,
}

/// Per-kind section of the status document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetail {
    pub status: JobStatus,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub subtasks: Option<Vec<Value>>,
    pub input_files: Option<Vec<String>>,
    pub output_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status document persisted at `<JobTag>/<jobtype>-status.json`.
///
/// The on-disk shape nests the detail section under a key named after the job
/// type, so the document (de)serializes through [`StatusDoc::to_value`] and
/// [`StatusDoc::from_value`] rather than a derive.
#[derive(Debug, Clone)]
pub struct StatusDoc {
    pub jobid: String,
    pub jobtag: String,
    pub jobtype: String,
    pub detail: StatusDetail,
}

impl StatusDoc {
    /// Builds the initial status document written by the intake handler.
    ///
    /// An `invalid` document nulls the start time, subtasks, and file lists; a
    /// `failed` one carries matching start and end timestamps so terminal-state
    /// invariants hold.
    pub fn initial(
        tag: &JobTag,
        job_type: &str,
        status: JobStatus,
        input_files: Vec<String>,
        output_files: Vec<String>,
        message: Option<String>,
    ) -> Self {
        let now = epoch_seconds();
        let detail = match status {
            JobStatus::Invalid => StatusDetail {
                status,
                start_time: None,
                end_time: None,
                subtasks: None,
                input_files: None,
                output_files: None,
                message,
            },
            JobStatus::Failed => StatusDetail {
                status,
                start_time: Some(now),
                end_time: Some(now),
                subtasks: Some(Vec::new()),
                input_files: Some(input_files),
                output_files: Some(output_files),
                message,
            },
            _ => StatusDetail {
                status,
                start_time: Some(now),
                end_time: None,
                subtasks: Some(Vec::new()),
                input_files: Some(input_files),
                output_files: Some(output_files),
                message,
            },
        };
        Self {
            jobid: tag.id.clone(),
            jobtag: tag.to_string(),
            jobtype: job_type.to_string(),
            detail,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("jobid".into(), json!(self.jobid));
        map.insert("jobtag".into(), json!(self.jobtag));
        map.insert("jobtype".into(), json!(self.jobtype));
        map.insert(
            self.jobtype.clone(),
            serde_json::to_value(&self.detail).unwrap_or(Value::Null),
        );
        Value::Object(map)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let jobid = value.get("jobid")?.as_str()?.to_string();
        let jobtype = value.get("jobtype")?.as_str()?.to_string();
        let jobtag = value
            .get("jobtag")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let detail = serde_json::from_value(value.get(&jobtype)?.clone()).ok()?;
        Some(Self {
            jobid,
            jobtag,
            jobtype,
            detail,
        })
    }
}

/// Intake event shape: an object-store notification with bucket and key.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectEvent {
    #[serde(rename = "Records")]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectRef {
    pub key: String,
}

/// Request payload for the upload-token API.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub file_list: Vec<String>,
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Response of the upload-token API; `urls` maps each requested file name to
/// its presigned PUT URL (empty string when issuance failed for that file).
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub date: String,
    pub job_id: String,
    pub job_tag: String,
    pub urls: serde_json::Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_charset_and_length() {
        for _ in 0..50 {
            let id = random_job_id();
            assert_eq!(id.len(), 10);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn job_kind_round_trip() {
        assert_eq!("apbs".parse::<JobKind>().unwrap(), JobKind::Apbs);
        assert_eq!("pdb2pqr".parse::<JobKind>().unwrap(), JobKind::Pdb2pqr);
        assert!("zzz".parse::<JobKind>().is_err());
        assert_eq!(JobKind::Pdb2pqr.binary_name(), "pdb2pqr30");
    }

    #[test]
    fn url_detection() {
        assert!(is_url("https://files.rcsb.org/download/1fas.pdb"));
        assert!(!is_url("2021-05-16/sampleId/1fas.pdb"));
        assert!(!is_url("apbsinput.in"));
    }

    #[test]
    fn status_doc_invalid_nulls_fields() {
        let tag = JobTag::new("2021-05-16", "sampleId");
        let doc = StatusDoc::initial(
            &tag,
            "zzz",
            JobStatus::Invalid,
            Vec::new(),
            Vec::new(),
            Some("Invalid job type. No job executed".into()),
        );
        let value = doc.to_value();
        let section = &value["zzz"];
        assert_eq!(section["status"], "invalid");
        assert!(section["startTime"].is_null());
        assert!(section["endTime"].is_null());
        assert!(section["subtasks"].is_null());
        assert!(section["inputFiles"].is_null());
        assert!(section["outputFiles"].is_null());
        assert_eq!(section["message"], "Invalid job type. No job executed");
    }

    #[test]
    fn status_doc_round_trip() {
        let tag = JobTag::new("2021-05-16", "sampleId");
        let doc = StatusDoc::initial(
            &tag,
            "apbs",
            JobStatus::Pending,
            vec![tag.key("apbsinput.in")],
            Vec::new(),
            None,
        );
        let value = doc.to_value();
        let parsed = StatusDoc::from_value(&value).unwrap();
        assert_eq!(parsed.jobid, "sampleId");
        assert_eq!(parsed.jobtype, "apbs");
        assert_eq!(parsed.detail.status, JobStatus::Pending);
        assert!(parsed.detail.start_time.is_some());
        assert!(parsed.detail.end_time.is_none());
        assert_eq!(
            parsed.detail.input_files.as_deref(),
            Some(&["2021-05-16/sampleId/apbsinput.in".to_string()][..])
        );
    }

    #[test]
    fn status_doc_failed_sets_terminal_times() {
        let tag = JobTag::new("2021-05-16", "sampleId");
        let doc = StatusDoc::initial(
            &tag,
            "apbs",
            JobStatus::Failed,
            Vec::new(),
            Vec::new(),
            Some("Files specified but not found: b.pqr".into()),
        );
        let start = doc.detail.start_time.unwrap();
        let end = doc.detail.end_time.unwrap();
        assert!(end >= start);
    }

    #[test]
    fn work_message_round_trip() {
        let msg = WorkMessage {
            job_date: "2021-05-16".into(),
            job_id: "sampleId".into(),
            job_tag: "2021-05-16/sampleId".into(),
            job_type: "apbs".into(),
            bucket_name: "input".into(),
            input_files: vec!["2021-05-16/sampleId/apbsinput.in".into()],
            command_line_args: "apbsinput.in".into(),
            max_run_time: Some(7200),
        };
        let body = serde_json::to_string(&msg).unwrap();
        let parsed: WorkMessage = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.job_tag, "2021-05-16/sampleId");
        assert_eq!(parsed.max_run_time, Some(7200));
    }
}
