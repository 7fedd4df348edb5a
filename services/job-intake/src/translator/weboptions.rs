//! Typed view of the options the PDB2PQR web form submits, and the command
//! line synthesized from them.

use serde_json::{Map, Value};
use shared::error::TranslateError;

use super::form_value_str;

const PH_HELP: &str = "Please choose a pH between 0.0 and 14.0.";

fn invalid(message: impl Into<String>) -> TranslateError {
    TranslateError::InvalidDescriptor(message.into())
}

/// Options gathered from the user-facing web form. Validation happens during
/// construction; a value that cannot be interpreted rejects the submission.
#[derive(Debug, Clone)]
pub struct WebOptions {
    pub debump: bool,
    pub opt: bool,
    pub ff: String,
    pub user_did_upload: bool,
    pub pdb_file_name: String,
    pub pqr_file_name: String,
    pub ph: Option<f64>,
    pub ph_calc_method: Option<String>,
    pub apbs_input: bool,
    pub whitespace: bool,
    pub userff_file_name: Option<String>,
    pub usernames_file_name: Option<String>,
    pub ffout: Option<String>,
    pub chain: bool,
    pub typemap: bool,
    pub neutraln: bool,
    pub neutralc: bool,
    pub drop_water: bool,
    pub ligand_file_name: Option<String>,
    pub extensions: Vec<String>,
    pub verbose: bool,
}

impl WebOptions {
    pub fn from_form(form: &Map<String, Value>) -> Result<Self, TranslateError> {
        let has = |key: &str| form.contains_key(key);
        let get = |key: &str| form.get(key).map(form_value_str);
        let get_non_empty = |key: &str| get(key).filter(|v| !v.is_empty());

        let ff = get("FF")
            .ok_or_else(|| invalid("Force field type missing from form."))?
            .to_lowercase();

        let pdb_source = get("PDBSOURCE");
        let (user_did_upload, pdb_file_name) =
            if get_non_empty("PDBID").is_some() && pdb_source.as_deref() == Some("ID") {
                (false, get("PDBID").unwrap_or_default())
            } else if pdb_source.as_deref() == Some("UPLOAD") && get_non_empty("PDBFILE").is_some()
            {
                (
                    true,
                    sanitize_file_name(&get("PDBFILE").unwrap_or_default()),
                )
            } else {
                return Err(invalid("You need to specify a pdb ID or upload a pdb file."));
            };

        let mut ph = None;
        let mut ph_calc_method = None;
        if let Some(method) = get("PKACALCMETHOD") {
            if method != "none" {
                let ph_text = get("PH").ok_or_else(|| invalid("Please provide a pH value."))?;
                let value: f64 = ph_text.trim().parse().map_err(|_| {
                    invalid(format!("The pH value provided must be a number!  {PH_HELP}"))
                })?;
                if !(0.0..=14.0).contains(&value) {
                    return Err(invalid(format!(
                        "The entered pH of {value:.2} is invalid!  {PH_HELP}"
                    )));
                }
                ph = Some(value);
                if method == "propka" || method == "pdb2pka" {
                    ph_calc_method = Some(method);
                }
            }
        }

        let mut userff_file_name = None;
        let mut usernames_file_name = None;
        if ff == "user" {
            userff_file_name = Some(sanitize_file_name(&get_non_empty("USERFFFILE").ok_or_else(
                || {
                    invalid(
                        "A force field file must be provided if using a user created force field.",
                    )
                },
            )?));
            usernames_file_name = Some(sanitize_file_name(&get_non_empty("NAMESFILE").ok_or_else(
                || invalid("A names file must be provided if using a user created force field."),
            )?));
        }

        let neutraln = has("NEUTRALN");
        let neutralc = has("NEUTRALC");
        if (neutraln || neutralc) && ff != "parse" {
            return Err(invalid(
                "Neutral N-terminus and C-terminus require the PARSE forcefield.",
            ));
        }

        let pqr_file_name = if let Some(stem) = pdb_file_name.strip_suffix(".pdb") {
            format!("{stem}.pqr")
        } else {
            format!("{pdb_file_name}.pqr")
        };

        Ok(Self {
            debump: has("DEBUMP"),
            opt: has("OPT"),
            ff,
            user_did_upload,
            pdb_file_name,
            pqr_file_name,
            ph,
            ph_calc_method,
            apbs_input: has("INPUT"),
            whitespace: has("WHITESPACE"),
            userff_file_name,
            usernames_file_name,
            ffout: get("FFOUT").filter(|v| v != "internal"),
            chain: has("CHAIN"),
            typemap: has("TYPEMAP"),
            neutraln,
            neutralc,
            drop_water: has("DROPWATER"),
            ligand_file_name: get_non_empty("LIGANDFILE").map(|v| sanitize_file_name(&v)),
            extensions: vec!["summary".to_string()],
            verbose: true,
        })
    }

    /// Renders the argument string handed to the tool.
    pub fn command_line(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if !self.debump {
            parts.push("--nodebump".into());
        }
        if !self.opt {
            parts.push("--noopt".into());
        }
        if let Some(ph) = self.ph {
            parts.push(format!("--with-ph={}", fmt_float(ph)));
        }
        if let Some(method) = &self.ph_calc_method {
            parts.push(format!("--ph-calc-method={method}"));
        }
        if self.drop_water {
            parts.push("--drop-water".into());
        }
        if self.apbs_input {
            parts.push("--apbs-input".into());
        }
        if self.whitespace {
            parts.push("--whitespace".into());
        }
        if let (Some(userff), Some(usernames), "user") = (
            self.userff_file_name.as_deref(),
            self.usernames_file_name.as_deref(),
            self.ff.as_str(),
        ) {
            parts.push(format!("--userff={userff}"));
            parts.push(format!("--usernames={usernames}"));
        } else {
            parts.push(format!("--ff={}", self.ff));
        }
        if let Some(ffout) = &self.ffout {
            parts.push(format!("--ffout={ffout}"));
        }
        for (enabled, flag) in [
            (self.chain, "chain"),
            (self.typemap, "typemap"),
            (self.neutraln, "neutraln"),
            (self.neutralc, "neutralc"),
            (self.verbose, "verbose"),
        ] {
            if enabled {
                parts.push(format!("--{flag}"));
            }
        }
        if let Some(ligand) = &self.ligand_file_name {
            parts.push(format!("--ligand={ligand}"));
        }
        for ext in &self.extensions {
            parts.push(format!("--{ext}"));
        }

        parts.push(self.pdb_file_name.clone());
        parts.push(self.pqr_file_name.clone());
        parts.join(" ")
    }
}

/// Keeps only the final path segment of an uploaded file name and replaces
/// spaces, matching the legacy web layer.
pub fn sanitize_file_name(file_name: &str) -> String {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .replace(' ', "_")
}

/// Python-style float rendering: whole numbers keep one decimal place.
fn fmt_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn pdb_id_command_line() {
        let options = WebOptions::from_form(&form(json!({
            "FF": "PARSE",
            "PDBID": "1fas",
            "PDBSOURCE": "ID",
            "PKACALCMETHOD": "propka",
            "PH": "7.0",
            "INPUT": "",
            "DEBUMP": "",
            "OPT": ""
        })))
        .unwrap();
        assert!(!options.user_did_upload);
        assert_eq!(options.pdb_file_name, "1fas");
        let cli = options.command_line();
        assert_eq!(
            cli,
            "--with-ph=7.0 --ph-calc-method=propka --apbs-input --ff=parse --verbose --summary 1fas 1fas.pqr"
        );
    }

    #[test]
    fn uploaded_pdb_is_sanitized() {
        let options = WebOptions::from_form(&form(json!({
            "FF": "amber",
            "PDBSOURCE": "UPLOAD",
            "PDBFILE": "dir/my protein.pdb",
            "DEBUMP": "",
            "OPT": ""
        })))
        .unwrap();
        assert!(options.user_did_upload);
        assert_eq!(options.pdb_file_name, "my_protein.pdb");
        assert_eq!(options.pqr_file_name, "my_protein.pqr");
    }

    #[test]
    fn missing_force_field_rejected() {
        let err = WebOptions::from_form(&form(json!({
            "PDBID": "1fas",
            "PDBSOURCE": "ID"
        })))
        .unwrap_err();
        assert!(err.to_string().contains("Force field type missing"));
    }

    #[test]
    fn ph_out_of_range_rejected() {
        let err = WebOptions::from_form(&form(json!({
            "FF": "parse",
            "PDBID": "1fas",
            "PDBSOURCE": "ID",
            "PKACALCMETHOD": "propka",
            "PH": "15.5"
        })))
        .unwrap_err();
        assert!(err.to_string().contains("The entered pH of 15.50 is invalid!"));
    }

    #[test]
    fn user_force_field_requires_files() {
        let err = WebOptions::from_form(&form(json!({
            "FF": "user",
            "PDBID": "1fas",
            "PDBSOURCE": "ID"
        })))
        .unwrap_err();
        assert!(err.to_string().contains("force field file must be provided"));

        let options = WebOptions::from_form(&form(json!({
            "FF": "user",
            "PDBID": "1fas",
            "PDBSOURCE": "ID",
            "USERFFFILE": "custom.dat",
            "NAMESFILE": "custom.names",
            "DEBUMP": "",
            "OPT": ""
        })))
        .unwrap();
        let cli = options.command_line();
        assert!(cli.contains("--userff=custom.dat"));
        assert!(cli.contains("--usernames=custom.names"));
        assert!(!cli.contains("--ff="));
    }

    #[test]
    fn neutral_termini_require_parse() {
        let err = WebOptions::from_form(&form(json!({
            "FF": "amber",
            "PDBID": "1fas",
            "PDBSOURCE": "ID",
            "NEUTRALC": ""
        })))
        .unwrap_err();
        assert!(err.to_string().contains("PARSE forcefield"));
    }

    #[test]
    fn nodebump_and_noopt_when_flags_absent() {
        let options = WebOptions::from_form(&form(json!({
            "FF": "parse",
            "PDBID": "1fas",
            "PDBSOURCE": "ID"
        })))
        .unwrap();
        let cli = options.command_line();
        assert!(cli.starts_with("--nodebump --noopt "));
    }
}
