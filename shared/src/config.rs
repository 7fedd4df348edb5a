//! Configuration helpers shared across the pipeline services.
//!
//! The configuration layer centralises access to environment variables so that
//! the intake handler, the worker, and the token API all agree on bucket
//! names, queue settings, and local paths.

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

fn default_input_bucket() -> String {
    "TEST_BUCKET".into()
}

/// Default visibility extension applied when a job carries no runtime estimate.
fn default_job_max_runtime() -> u64 {
    2000
}

/// Default visibility timeout for the initial queue receive.
fn default_queue_timeout() -> i32 {
    300
}

/// Consecutive empty polls before the worker loop exits.
fn default_max_tries() -> u32 {
    60
}

/// Sleep between empty polls, in seconds.
fn default_retry_time() -> u64 {
    15
}

fn default_job_path() -> String {
    "/var/tmp/".into()
}

#[derive(Debug, Clone, Deserialize)]
/// Top level configuration object constructed from environment variables.
///
/// `OUTPUT_BUCKET` and `JOB_QUEUE_NAME` have no defaults; deserialization
/// fails when they are absent, which the binaries treat as a fatal startup
/// error.
pub struct Settings {
    #[serde(default = "default_input_bucket")]
    pub input_bucket: String,
    pub output_bucket: String,
    pub job_queue_name: String,
    #[serde(default = "default_job_max_runtime")]
    pub job_max_runtime: u64,
    #[serde(default = "default_queue_timeout")]
    pub sqs_queue_timeout: i32,
    #[serde(default = "default_max_tries")]
    pub sqs_max_tries: u32,
    #[serde(default = "default_retry_time")]
    pub sqs_retry_time: u64,
    #[serde(default = "default_job_path")]
    pub job_path: String,
    #[serde(default)]
    pub log_level: Option<u8>,
}

impl Settings {
    /// Loads settings from the process environment, falling back to defaults
    /// where individual values are not provided.
    pub fn new() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()
    }

    /// Returns the tracing filter derived from the numeric `LOG_LEVEL`
    /// variable. `RUST_LOG` still wins when it is set.
    pub fn env_filter(&self) -> EnvFilter {
        if std::env::var("RUST_LOG").is_ok() {
            return EnvFilter::from_default_env();
        }
        let level = match self.log_level {
            Some(l) if l <= 10 => "debug",
            Some(l) if l <= 20 => "info",
            Some(l) if l <= 30 => "warn",
            Some(_) => "error",
            None => "info",
        };
        EnvFilter::new(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "output_bucket": "out",
            "job_queue_name": "jobs",
        }))
        .unwrap();
        assert_eq!(settings.job_max_runtime, 2000);
        assert_eq!(settings.sqs_queue_timeout, 300);
        assert_eq!(settings.sqs_max_tries, 60);
        assert_eq!(settings.sqs_retry_time, 15);
        assert_eq!(settings.job_path, "/var/tmp/");
        assert_eq!(settings.input_bucket, "TEST_BUCKET");
    }

    #[test]
    fn missing_required_fields_fail() {
        let result: Result<Settings, _> =
            serde_json::from_value(serde_json::json!({ "output_bucket": "out" }));
        assert!(result.is_err());
    }
}
