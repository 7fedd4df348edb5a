//! Turns a job descriptor into the command line, input file list, and derived
//! artifacts a worker needs to execute it.

pub mod apbs;
pub mod infile;
pub mod pdb2pqr;
pub mod weboptions;

use serde_json::{Map, Value};
use shared::dto::{is_url, JobKind, JobTag};
use shared::error::TranslateError;
use shared::object_store::ObjectStore;

/// Everything the intake handler needs to enqueue a run.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    /// Passed verbatim as the subprocess argument tail.
    pub cli_args: String,
    /// Object keys (job-relative) or URLs, in materialization order.
    pub input_files: Vec<String>,
    /// Keys the translator already produced (e.g. the preserved with-water PQR).
    pub output_files: Vec<String>,
    /// Used to extend the queue lease beyond the configured default.
    pub estimated_max_runtime: Option<u64>,
}

/// Accumulates the file lists every translation path builds up.
///
/// Plain names are qualified with the job tag; URLs are kept verbatim.
#[derive(Debug)]
pub struct JobSetup {
    pub tag: JobTag,
    pub input_files: Vec<String>,
    pub output_files: Vec<String>,
    missing_files: Vec<String>,
}

impl JobSetup {
    pub fn new(tag: JobTag) -> Self {
        Self {
            tag,
            input_files: Vec::new(),
            output_files: Vec::new(),
            missing_files: Vec::new(),
        }
    }

    pub fn add_input_file(&mut self, file_name: &str) {
        if is_url(file_name) {
            self.input_files.push(file_name.to_string());
        } else {
            self.input_files.push(self.tag.key(file_name));
        }
    }

    pub fn add_output_file(&mut self, file_name: &str) {
        self.output_files.push(self.tag.key(file_name));
    }

    pub fn add_missing_file(&mut self, file_name: &str) {
        self.missing_files.push(file_name.to_string());
    }

    /// Consumes the accumulated missing files; non-empty means the job cannot
    /// run and the caller must fail with [`TranslateError::MissingFiles`].
    pub fn take_missing(&mut self) -> Option<Vec<String>> {
        if self.missing_files.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.missing_files))
        }
    }
}

/// Dispatches a descriptor form to the kind-specific preparation path.
///
/// `input_bucket` is the bucket that raised the event (user uploads land
/// there); derived artifacts for composed runs are read from `output_bucket`.
pub async fn prepare<S: ObjectStore + ?Sized>(
    kind: JobKind,
    form: &Map<String, Value>,
    tag: &JobTag,
    store: &S,
    input_bucket: &str,
    output_bucket: &str,
) -> Result<PreparedJob, TranslateError> {
    match kind {
        JobKind::Apbs => apbs::prepare_job(form, tag, store, input_bucket, output_bucket).await,
        JobKind::Pdb2pqr => pdb2pqr::prepare_job(form, tag, store, input_bucket).await,
    }
}

/// A form value rendered as a string, the way the legacy web layer casts
/// everything that is not already a string.
pub(crate) fn form_value_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => {
            if *b {
                "True".into()
            } else {
                "False".into()
            }
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn form_str(
    form: &Map<String, Value>,
    key: &str,
) -> Result<String, TranslateError> {
    form.get(key)
        .map(form_value_str)
        .ok_or_else(|| TranslateError::InvalidDescriptor(format!("missing form field '{key}'")))
}

/// Locale-independent integer conversion of a form field.
pub(crate) fn form_atoi(form: &Map<String, Value>, key: &str) -> Result<i64, TranslateError> {
    let value = form
        .get(key)
        .ok_or_else(|| TranslateError::InvalidDescriptor(format!("missing form field '{key}'")))?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| non_numeric(key, &n.to_string())),
        other => {
            let text = form_value_str(other);
            text.trim()
                .parse::<i64>()
                .map_err(|_| non_numeric(key, &text))
        }
    }
}

/// Locale-independent float conversion of a form field.
pub(crate) fn form_atof(form: &Map<String, Value>, key: &str) -> Result<f64, TranslateError> {
    let value = form
        .get(key)
        .ok_or_else(|| TranslateError::InvalidDescriptor(format!("missing form field '{key}'")))?;
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| non_numeric(key, &n.to_string())),
        other => {
            let text = form_value_str(other);
            text.trim()
                .parse::<f64>()
                .map_err(|_| non_numeric(key, &text))
        }
    }
}

fn non_numeric(key: &str, value: &str) -> TranslateError {
    TranslateError::InvalidDescriptor(format!("form field '{key}' is not numeric: '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn setup_qualifies_plain_names() {
        let mut setup = JobSetup::new(JobTag::new("2021-05-16", "sampleId"));
        setup.add_input_file("1fas.pqr");
        setup.add_input_file("https://files.rcsb.org/download/1fas.pdb");
        assert_eq!(
            setup.input_files,
            vec![
                "2021-05-16/sampleId/1fas.pqr".to_string(),
                "https://files.rcsb.org/download/1fas.pdb".to_string(),
            ]
        );
    }

    #[test]
    fn numeric_helpers_accept_numbers_and_strings() {
        let form = form(json!({ "dimenx": "97", "temp": 298.15, "mol": 1 }));
        assert_eq!(form_atoi(&form, "dimenx").unwrap(), 97);
        assert_eq!(form_atoi(&form, "mol").unwrap(), 1);
        assert!((form_atof(&form, "temp").unwrap() - 298.15).abs() < 1e-9);
        assert!(form_atoi(&form, "missing").is_err());
        assert!(form_atof(&form, "dimenx").is_ok());
    }
}
