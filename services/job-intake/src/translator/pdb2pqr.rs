//! Preparation of PDB2PQR jobs, invoked either through the versioned CLI form
//! or the legacy web GUI form.

use serde_json::{Map, Value};
use shared::dto::JobTag;
use shared::error::TranslateError;
use shared::object_store::ObjectStore;
use tracing::info;

use super::weboptions::WebOptions;
use super::{form_str, form_value_str, JobSetup, PreparedJob};

const ESTIMATED_MAX_RUNTIME: u64 = 2700;

const RCSB_DOWNLOAD_URL: &str = "https://files.rcsb.org/download";

/// Flag names whose values name additional user-supplied input files.
const FILE_FLAGS: &[&str] = &["userff", "usernames", "ligand"];

pub async fn prepare_job<S: ObjectStore + ?Sized>(
    form: &Map<String, Value>,
    tag: &JobTag,
    store: &S,
    input_bucket: &str,
) -> Result<PreparedJob, TranslateError> {
    let invoke_method = form
        .get("invoke_method")
        .map(form_value_str)
        .map(|v| v.to_lowercase());
    info!(job_id = %tag.id, invoke_method = ?invoke_method, "preparing job execution (pdb2pqr)");

    match invoke_method.as_deref() {
        Some("v2") | Some("cli") => cli_job(form, tag, store, input_bucket).await,
        Some("v1") | Some("gui") | None => gui_job(form, tag),
        Some(other) => Err(TranslateError::InvalidDescriptor(format!(
            "unrecognized invoke_method '{other}'"
        ))),
    }
}

/// CLI invocation: the form carries the flag mapping verbatim. Flag order is
/// preserved when rendering the argument string.
async fn cli_job<S: ObjectStore + ?Sized>(
    form: &Map<String, Value>,
    tag: &JobTag,
    store: &S,
    input_bucket: &str,
) -> Result<PreparedJob, TranslateError> {
    let pdb_name = form_str(form, "pdb_name")?;
    let pqr_name = form_str(form, "pqr_name")?;
    let flags = form
        .get("flags")
        .and_then(Value::as_object)
        .ok_or_else(|| TranslateError::InvalidDescriptor("missing form field 'flags'".into()))?;

    let mut setup = JobSetup::new(tag.clone());

    // The PDB may not have been uploaded at all; fall back to the archive URL
    // so the worker fetches it over HTTP.
    if store.head(input_bucket, &tag.key(&pdb_name)).await? {
        setup.add_input_file(&pdb_name);
    } else {
        setup.add_input_file(&format!("{RCSB_DOWNLOAD_URL}/{pdb_name}"));
    }

    let mut flag_str = String::new();
    for (name, value) in flags {
        match value {
            Value::Bool(_) => flag_str.push_str(&format!("--{name} ")),
            other => flag_str.push_str(&format!("--{name}={} ", form_value_str(other))),
        }
        if FILE_FLAGS.contains(&name.as_str()) {
            if let Some(file) = form
                .get(name.as_str())
                .map(form_value_str)
                .filter(|v| !v.is_empty())
            {
                setup.add_input_file(&file);
            }
        }
    }

    Ok(PreparedJob {
        cli_args: format!("{flag_str} {pdb_name} {pqr_name}"),
        input_files: setup.input_files,
        output_files: setup.output_files,
        estimated_max_runtime: Some(ESTIMATED_MAX_RUNTIME),
    })
}

/// GUI invocation: interpret the web form, substituting the archive URL when
/// the user referenced a PDB id instead of uploading a file.
fn gui_job(form: &Map<String, Value>, tag: &JobTag) -> Result<PreparedJob, TranslateError> {
    let mut options = WebOptions::from_form(form)?;
    let mut setup = JobSetup::new(tag.clone());

    if options.user_did_upload {
        setup.add_input_file(&options.pdb_file_name);
    } else {
        if !options.pdb_file_name.ends_with(".pdb") {
            options.pdb_file_name.push_str(".pdb");
        }
        setup.add_input_file(&format!("{RCSB_DOWNLOAD_URL}/{}", options.pdb_file_name));
    }

    if let Some(name) = options.ligand_file_name.clone() {
        setup.add_input_file(&name);
    }
    if let Some(name) = options.userff_file_name.clone() {
        setup.add_input_file(&name);
    }
    if let Some(name) = options.usernames_file_name.clone() {
        setup.add_input_file(&name);
    }

    // The produced PQR is always named after the job id.
    options.pqr_file_name = format!("{}.pqr", tag.id);

    let mut cli_args = options.command_line();
    if cli_args.contains("--summary") {
        cli_args = cli_args.replace("--summary", "");
    }

    Ok(PreparedJob {
        cli_args,
        input_files: setup.input_files,
        output_files: setup.output_files,
        estimated_max_runtime: Some(ESTIMATED_MAX_RUNTIME),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::object_store::MemoryObjectStore;

    fn form(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn cli_form() -> Map<String, Value> {
        form(json!({
            "invoke_method": "v2",
            "pdb_name": "1fas.pdb",
            "pqr_name": "sampleId.pqr",
            "flags": {
                "with-ph": 7.0,
                "ph-calc-method": "propka",
                "drop-water": true,
                "apbs-input": true,
                "ff": "parse",
                "verbose": true
            }
        }))
    }

    #[tokio::test]
    async fn cli_flags_render_in_descriptor_order() {
        let store = MemoryObjectStore::new();
        let tag = JobTag::new("2021-05-16", "sampleId");
        let prepared = prepare_job(&cli_form(), &tag, &store, "input").await.unwrap();
        assert_eq!(
            prepared.cli_args,
            "--with-ph=7.0 --ph-calc-method=propka --drop-water --apbs-input --ff=parse --verbose  1fas.pdb sampleId.pqr"
        );
        assert_eq!(prepared.estimated_max_runtime, Some(2700));
    }

    #[tokio::test]
    async fn cli_pdb_falls_back_to_archive_url() {
        let store = MemoryObjectStore::new();
        let tag = JobTag::new("2021-05-16", "sampleId");
        let prepared = prepare_job(&cli_form(), &tag, &store, "input").await.unwrap();
        assert_eq!(
            prepared.input_files,
            vec!["https://files.rcsb.org/download/1fas.pdb".to_string()]
        );
    }

    #[tokio::test]
    async fn cli_uploaded_pdb_stays_job_relative() {
        let store = MemoryObjectStore::new();
        store.insert("input", "2021-05-16/sampleId/1fas.pdb", "pdb data");
        let tag = JobTag::new("2021-05-16", "sampleId");
        let prepared = prepare_job(&cli_form(), &tag, &store, "input").await.unwrap();
        assert_eq!(
            prepared.input_files,
            vec!["2021-05-16/sampleId/1fas.pdb".to_string()]
        );
    }

    #[tokio::test]
    async fn cli_file_flags_extend_input_list() {
        let store = MemoryObjectStore::new();
        let tag = JobTag::new("2021-05-16", "sampleId");
        let mut descriptor = cli_form();
        descriptor.insert("ligand".into(), json!("lig.mol2"));
        let flags = descriptor
            .get_mut("flags")
            .and_then(Value::as_object_mut)
            .unwrap();
        flags.insert("ligand".into(), json!("lig.mol2"));
        let prepared = prepare_job(&descriptor, &tag, &store, "input").await.unwrap();
        assert!(prepared
            .input_files
            .contains(&"2021-05-16/sampleId/lig.mol2".to_string()));
    }

    #[tokio::test]
    async fn gui_pdb_id_builds_url_and_forces_pqr_name() {
        let store = MemoryObjectStore::new();
        let tag = JobTag::new("2021-05-16", "sampleId");
        let descriptor = form(json!({
            "FF": "parse",
            "PDBID": "1fas",
            "PDBSOURCE": "ID",
            "DEBUMP": "",
            "OPT": ""
        }));
        let prepared = prepare_job(&descriptor, &tag, &store, "input").await.unwrap();
        assert_eq!(
            prepared.input_files,
            vec!["https://files.rcsb.org/download/1fas.pdb".to_string()]
        );
        assert!(prepared.cli_args.ends_with("1fas.pdb sampleId.pqr"));
        assert!(!prepared.cli_args.contains("--summary"));
    }

    #[tokio::test]
    async fn unrecognized_invoke_method_rejected() {
        let store = MemoryObjectStore::new();
        let tag = JobTag::new("2021-05-16", "sampleId");
        let descriptor = form(json!({ "invoke_method": "v3" }));
        let err = prepare_job(&descriptor, &tag, &store, "input")
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::InvalidDescriptor(_)));
    }
}
