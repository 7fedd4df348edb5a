//! Preparation of APBS jobs.
//!
//! Two shapes arrive here: direct submissions that name a pre-written input
//! file plus its supporting data, and composed submissions carrying the web
//! form of a finished PDB2PQR run. Composed runs synthesize a fresh input file
//! and stage it (plus the PQR it references) into the input bucket.

use serde_json::{Map, Value};
use shared::dto::JobTag;
use shared::error::{StoreError, TranslateError};
use shared::object_store::ObjectStore;
use tracing::{info, warn};

use super::infile::{extract_input_files, fmt_g, strip_water};
use super::{form_atof, form_atoi, form_str, form_value_str, JobSetup, PreparedJob};

/// Name of the synthesized input file staged for composed runs.
const GENERATED_INFILE: &str = "apbsinput.in";

const ESTIMATED_MAX_RUNTIME: u64 = 7200;

/// Canonical emission order of the scalar write statements.
const WRITE_KINDS: &[(&str, &str)] = &[
    ("writesmol", "smol"),
    ("writesspl", "sspl"),
    ("writevdw", "vdw"),
    ("writeivdw", "ivdw"),
    ("writelap", "lap"),
    ("writeedens", "edens"),
    ("writendens", "ndens"),
    ("writeqdens", "qdens"),
    ("writedielx", "dielx"),
    ("writediely", "diely"),
    ("writedielz", "dielz"),
    ("writekappa", "kappa"),
];

pub async fn prepare_job<S: ObjectStore + ?Sized>(
    form: &Map<String, Value>,
    tag: &JobTag,
    store: &S,
    input_bucket: &str,
    output_bucket: &str,
) -> Result<PreparedJob, TranslateError> {
    info!(job_id = %tag.id, "preparing job execution (apbs)");
    if form.contains_key("filename") {
        direct_job(form, tag, store, input_bucket).await
    } else {
        composed_job(form, tag, store, input_bucket, output_bucket).await
    }
}

/// Direct submission: the user uploaded the input file and every file it
/// references. All of them must already exist under the job prefix.
async fn direct_job<S: ObjectStore + ?Sized>(
    form: &Map<String, Value>,
    tag: &JobTag,
    store: &S,
    input_bucket: &str,
) -> Result<PreparedJob, TranslateError> {
    let infile_name = form_str(form, "filename")?;
    let mut expected = vec![infile_name.clone()];
    if let Some(Value::Array(support)) = form.get("support_files") {
        expected.extend(support.iter().map(form_value_str));
    }

    let mut setup = JobSetup::new(tag.clone());
    for name in &expected {
        if store.head(input_bucket, &tag.key(name)).await? {
            setup.add_input_file(name);
        } else {
            setup.add_missing_file(name);
        }
    }
    if let Some(missing) = setup.take_missing() {
        return Err(TranslateError::MissingFiles(missing));
    }

    Ok(PreparedJob {
        cli_args: infile_name,
        input_files: setup.input_files,
        output_files: setup.output_files,
        estimated_max_runtime: Some(ESTIMATED_MAX_RUNTIME),
    })
}

/// Composed submission: read the input file left behind by the PDB2PQR run,
/// rebuild it from the form options, and stage both it and the (optionally
/// water-stripped) PQR into the input bucket. Nothing is uploaded until every
/// read has succeeded.
async fn composed_job<S: ObjectStore + ?Sized>(
    form: &Map<String, Value>,
    tag: &JobTag,
    store: &S,
    input_bucket: &str,
    output_bucket: &str,
) -> Result<PreparedJob, TranslateError> {
    let mut options = ApbsOptions::from_form(form)?;

    let infile_name = format!("{}.in", tag.id);
    let infile_text = match store.get_bytes(output_bucket, &tag.key(&infile_name)).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(StoreError::NoSuchKey { .. }) => {
            return Err(TranslateError::MissingFiles(vec![infile_name]))
        }
        Err(err) => return Err(err.into()),
    };

    let pqr_file_name = extract_input_files(&infile_text)
        .into_iter()
        .next()
        .ok_or_else(|| {
            TranslateError::InvalidDescriptor(format!(
                "no files referenced in READ section of {infile_name}"
            ))
        })?;
    options.pqr_file_name = pqr_file_name.clone();

    let mut pqr_text = match store.get_bytes(output_bucket, &tag.key(&pqr_file_name)).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(StoreError::NoSuchKey { .. }) => {
            return Err(TranslateError::MissingFiles(vec![pqr_file_name]))
        }
        Err(err) => return Err(err.into()),
    };

    let new_infile_contents = render_infile(&options);

    let mut setup = JobSetup::new(tag.clone());
    if form.get("removewater").map(form_value_str).as_deref() == Some("on") {
        let (root, ext) = split_ext(&pqr_file_name);
        let water_name = format!("{root}-water{ext}");
        store
            .put_bytes(
                output_bucket,
                &tag.key(&water_name),
                pqr_text.clone().into_bytes(),
            )
            .await?;
        setup.add_output_file(&water_name);
        pqr_text = strip_water(&pqr_text);
    }

    store
        .put_bytes(
            input_bucket,
            &tag.key(GENERATED_INFILE),
            new_infile_contents.into_bytes(),
        )
        .await?;
    store
        .put_bytes(input_bucket, &tag.key(&pqr_file_name), pqr_text.into_bytes())
        .await?;

    setup.add_input_file(&pqr_file_name);
    setup.add_input_file(GENERATED_INFILE);

    Ok(PreparedJob {
        cli_args: GENERATED_INFILE.to_string(),
        input_files: setup.input_files,
        output_files: setup.output_files,
        estimated_max_runtime: Some(ESTIMATED_MAX_RUNTIME),
    })
}

/// `os.path.splitext` equivalent for the plain file names seen here.
fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Grid centering selected by the form, either a molecule id or a coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridCenter {
    Molecule(i64),
    Coordinate(i64, i64, i64),
}

/// An ion species line; emitted only when the form fills all three fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Ion {
    pub charge: i64,
    pub conc: f64,
    pub radius: f64,
}

/// Typed view of the composed-run web form.
#[derive(Debug, Clone)]
pub struct ApbsOptions {
    pub calc_type: String,
    pub dime: (i64, i64, i64),
    pub pdime: (f64, f64, f64),
    pub ofrac: f64,
    pub glen: (f64, f64, f64),
    pub cglen: (f64, f64, f64),
    pub fglen: (f64, f64, f64),
    pub coarse_center: Option<GridCenter>,
    pub fine_center: Option<GridCenter>,
    pub grid_center: Option<GridCenter>,
    pub mol: i64,
    pub solve_type: String,
    pub boundary_conditions: String,
    pub pdie: f64,
    pub sdie: f64,
    pub srfm: String,
    pub chgm: String,
    pub sdens: f64,
    pub srad: f64,
    pub swin: f64,
    pub temp: f64,
    pub calc_energy: String,
    pub calc_force: String,
    pub ions: Vec<Ion>,
    pub writes: Vec<&'static str>,
    pub async_flag: bool,
    pub async_rank: i64,
    pub write_format: String,
    pub write_stem: String,
    pub read_type: String,
    pub read_format: String,
    pub pqr_path: String,
    pub pqr_file_name: String,
}

impl ApbsOptions {
    /// Field-by-field translation of the web form into typed options.
    pub fn from_form(raw_form: &Map<String, Value>) -> Result<Self, TranslateError> {
        // Unravel the scalar-output multi-select into individual fields before
        // evaluating the per-field triggers.
        let mut form = raw_form.clone();
        if let Some(Value::Array(selected)) = form.remove("output_scalar") {
            for option in selected {
                let name = form_value_str(&option);
                form.insert(name.clone(), Value::String(name));
            }
        }

        let non_empty = |key: &str| {
            form.get(key)
                .map(form_value_str)
                .map(|v| !v.is_empty())
                .unwrap_or(false)
        };
        let is_on = |key: &str| form.get(key).map(form_value_str).as_deref() == Some("on");

        let mut writes: Vec<&'static str> = Vec::new();
        if non_empty("writecharge") {
            writes.push("charge");
        }
        if non_empty("writepot") {
            writes.push("pot");
        }
        for &(field, kind) in WRITE_KINDS {
            if is_on(field) {
                writes.push(kind);
            }
        }
        if writes.len() > 4 {
            warn!(
                count = writes.len(),
                "more than four write statements selected"
            );
        }

        let (async_flag, async_rank) = if is_on("asyncflag") {
            (true, form_atoi(&form, "async")?)
        } else {
            (false, 0)
        };

        let calc_type = form_str(&form, "type")?;

        let coarse_center = grid_center(&form, "cgcent", "cgcentid", ("cgxcent", "cgycent", "cgzcent"))?;
        let fine_center = grid_center(&form, "fgcent", "fgcentid", ("fgxcent", "fgycent", "fgzcent"))?;
        let grid_center = if matches!(calc_type.as_str(), "mg-manual" | "mg-dummy") {
            self::grid_center(&form, "gcent", "gcentid", ("gxcent", "gycent", "gzcent"))?
        } else {
            None
        };

        let mut ions = Vec::new();
        for i in 0..3 {
            let charge_key = format!("charge{i}");
            let conc_key = format!("conc{i}");
            let radius_key = format!("radius{i}");
            let filled = |key: &str| {
                form.get(key)
                    .map(form_value_str)
                    .map(|v| !v.is_empty())
                    .unwrap_or(false)
            };
            if filled(&charge_key) && filled(&conc_key) && filled(&radius_key) {
                ions.push(Ion {
                    charge: form_atoi(&form, &charge_key)?,
                    conc: form_atof(&form, &conc_key)?,
                    radius: form_atof(&form, &radius_key)?,
                });
            }
        }

        let write_stem = match form.get("pdb2pqrid").map(form_value_str) {
            Some(stem) if !stem.is_empty() => stem,
            // No stem means the upstream run never happened; the referenced
            // artifacts cannot exist.
            _ => return Err(TranslateError::MissingFiles(vec!["pdb2pqrid".to_string()])),
        };

        Ok(Self {
            dime: (
                form_atoi(&form, "dimenx")?,
                form_atoi(&form, "dimeny")?,
                form_atoi(&form, "dimenz")?,
            ),
            pdime: (
                form_atof(&form, "pdimex")?,
                form_atof(&form, "pdimey")?,
                form_atof(&form, "pdimez")?,
            ),
            ofrac: form_atof(&form, "ofrac")?,
            glen: (
                form_atof(&form, "glenx")?,
                form_atof(&form, "gleny")?,
                form_atof(&form, "glenz")?,
            ),
            cglen: (
                form_atof(&form, "cglenx")?,
                form_atof(&form, "cgleny")?,
                form_atof(&form, "cglenz")?,
            ),
            fglen: (
                form_atof(&form, "fglenx")?,
                form_atof(&form, "fgleny")?,
                form_atof(&form, "fglenz")?,
            ),
            coarse_center,
            fine_center,
            grid_center,
            mol: form_atoi(&form, "mol")?,
            solve_type: form_str(&form, "solvetype")?,
            boundary_conditions: form_str(&form, "bcfl")?,
            pdie: form_atof(&form, "pdie")?,
            sdie: form_atof(&form, "sdie")?,
            srfm: form_str(&form, "srfm")?,
            chgm: form_str(&form, "chgm")?,
            sdens: form_atof(&form, "sdens")?,
            srad: form_atof(&form, "srad")?,
            swin: form_atof(&form, "swin")?,
            temp: form_atof(&form, "temp")?,
            calc_energy: form_str(&form, "calcenergy")?,
            calc_force: form_str(&form, "calcforce")?,
            ions,
            writes,
            async_flag,
            async_rank,
            write_format: form_str(&form, "writeformat")?,
            write_stem,
            read_type: "mol".to_string(),
            read_format: "pqr".to_string(),
            pqr_path: String::new(),
            pqr_file_name: String::new(),
            calc_type,
        })
    }
}

/// Parses one of the three centering selectors.
fn grid_center(
    form: &Map<String, Value>,
    method_key: &str,
    id_key: &str,
    coord_keys: (&str, &str, &str),
) -> Result<Option<GridCenter>, TranslateError> {
    match form.get(method_key).map(form_value_str).as_deref() {
        Some("mol") => Ok(Some(GridCenter::Molecule(form_atoi(form, id_key)?))),
        Some("coord") => Ok(Some(GridCenter::Coordinate(
            form_atoi(form, coord_keys.0)?,
            form_atoi(form, coord_keys.1)?,
            form_atoi(form, coord_keys.2)?,
        ))),
        _ => Ok(None),
    }
}

/// Renders the new input file. Line order and spacing are part of the
/// contract; the downstream parser rejects reordering.
pub fn render_infile(options: &ApbsOptions) -> String {
    use std::fmt::Write as _;

    let tab = "    ";
    let mut out = String::new();

    out.push_str("read\n");
    let _ = write!(
        out,
        "{tab}{} {} {}{}",
        options.read_type, options.read_format, options.pqr_path, options.pqr_file_name
    );
    out.push_str("\nend\n");

    out.push_str("elec\n");
    let _ = writeln!(out, "{tab}{}", options.calc_type);
    if options.calc_type != "fe-manual" {
        let _ = writeln!(
            out,
            "{tab}dime {} {} {}",
            options.dime.0, options.dime.1, options.dime.2
        );
    }
    if options.calc_type == "mg-para" {
        let _ = writeln!(
            out,
            "{tab}pdime {} {} {}",
            options.pdime.0 as i64, options.pdime.1 as i64, options.pdime.2 as i64
        );
        let _ = writeln!(out, "{tab}ofrac {}", fmt_g(options.ofrac));
        if options.async_flag {
            let _ = writeln!(out, "{tab}async {}", options.async_rank);
        }
    }

    if options.calc_type == "mg-manual" {
        let _ = writeln!(
            out,
            "{tab}glen {} {} {}",
            fmt_g(options.glen.0),
            fmt_g(options.glen.1),
            fmt_g(options.glen.2)
        );
    }
    if matches!(options.calc_type.as_str(), "mg-auto" | "mg-para" | "mg-dummy") {
        let _ = writeln!(
            out,
            "{tab}cglen {} {} {}",
            fmt_g(options.cglen.0),
            fmt_g(options.cglen.1),
            fmt_g(options.cglen.2)
        );
    }
    if matches!(options.calc_type.as_str(), "mg-auto" | "mg-para") {
        let _ = writeln!(
            out,
            "{tab}fglen {} {} {}",
            fmt_g(options.fglen.0),
            fmt_g(options.fglen.1),
            fmt_g(options.fglen.2)
        );
        if let Some(center) = &options.coarse_center {
            render_center(&mut out, tab, "cgcent", center);
        }
        if let Some(center) = &options.fine_center {
            render_center(&mut out, tab, "fgcent", center);
        }
    }
    if matches!(options.calc_type.as_str(), "mg-manual" | "mg-dummy") {
        if let Some(center) = &options.grid_center {
            render_center(&mut out, tab, "gcent", center);
        }
    }

    let _ = writeln!(out, "{tab}mol {}", options.mol);
    let _ = writeln!(out, "{tab}{}", options.solve_type);
    let _ = writeln!(out, "{tab}bcfl {}", options.boundary_conditions);
    let _ = writeln!(out, "{tab}pdie {}", fmt_g(options.pdie));
    let _ = writeln!(out, "{tab}sdie {}", fmt_g(options.sdie));
    let _ = writeln!(out, "{tab}srfm {}", options.srfm);
    let _ = writeln!(out, "{tab}chgm {}", options.chgm);
    let _ = writeln!(out, "{tab}sdens {}", fmt_g(options.sdens));
    let _ = writeln!(out, "{tab}srad {}", fmt_g(options.srad));
    let _ = writeln!(out, "{tab}swin {}", fmt_g(options.swin));
    let _ = writeln!(out, "{tab}temp {}", fmt_g(options.temp));
    let _ = writeln!(out, "{tab}calcenergy {}", options.calc_energy);
    let _ = writeln!(out, "{tab}calcforce {}", options.calc_force);
    for ion in &options.ions {
        let _ = writeln!(
            out,
            "{tab}ion charge {} conc {} radius {}",
            ion.charge,
            fmt_g(ion.conc),
            fmt_g(ion.radius)
        );
    }
    for kind in &options.writes {
        let _ = writeln!(
            out,
            "{tab}write {kind} {} {}-{kind}",
            options.write_format, options.write_stem
        );
    }

    out.push_str("end\nquit");
    out
}

fn render_center(out: &mut String, tab: &str, keyword: &str, center: &GridCenter) {
    use std::fmt::Write as _;
    match center {
        GridCenter::Molecule(id) => {
            let _ = writeln!(out, "{tab}{keyword} mol {id}");
        }
        GridCenter::Coordinate(x, y, z) => {
            let _ = writeln!(out, "{tab}{keyword} {x} {y} {z}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_form() -> Map<String, Value> {
        json!({
            "type": "mg-auto",
            "pdb2pqrid": "1fas",
            "dimenx": "97", "dimeny": "97", "dimenz": "97",
            "cglenx": "104.848", "cgleny": "99.183", "cglenz": "98.497",
            "fglenx": "81.675", "fgleny": "78.343", "fglenz": "77.755",
            "glenx": "0", "gleny": "0", "glenz": "0",
            "pdimex": "0", "pdimey": "0", "pdimez": "0",
            "ofrac": "0.1",
            "cgcent": "mol", "cgcentid": "1",
            "fgcent": "mol", "fgcentid": "1",
            "mol": "1",
            "solvetype": "lpbe",
            "bcfl": "sdh",
            "pdie": "2", "sdie": "78.54",
            "srfm": "smol", "chgm": "spl2",
            "sdens": "10", "srad": "1.4", "swin": "0.3", "temp": "298.15",
            "calcenergy": "total", "calcforce": "no",
            "charge0": "", "conc0": "", "radius0": "",
            "charge1": "", "conc1": "", "radius1": "",
            "charge2": "", "conc2": "", "radius2": "",
            "writeformat": "dx",
            "writepot": "on"
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn mg_auto_renders_byte_exact() {
        let mut options = ApbsOptions::from_form(&base_form()).unwrap();
        options.pqr_file_name = "1fas.pqr".to_string();
        let rendered = render_infile(&options);
        let expected = "\
read
    mol pqr 1fas.pqr
end
elec
    mg-auto
    dime 97 97 97
    cglen 104.848 99.183 98.497
    fglen 81.675 78.343 77.755
    cgcent mol 1
    fgcent mol 1
    mol 1
    lpbe
    bcfl sdh
    pdie 2
    sdie 78.54
    srfm smol
    chgm spl2
    sdens 10
    srad 1.4
    swin 0.3
    temp 298.15
    calcenergy total
    calcforce no
    write pot dx 1fas-pot
end
quit";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn mg_para_emits_parallel_lines() {
        let mut form = base_form();
        form.insert("type".into(), json!("mg-para"));
        form.insert("pdimex".into(), json!("2"));
        form.insert("pdimey".into(), json!("2"));
        form.insert("pdimez".into(), json!("2"));
        form.insert("asyncflag".into(), json!("on"));
        form.insert("async".into(), json!("3"));
        let mut options = ApbsOptions::from_form(&form).unwrap();
        options.pqr_file_name = "1fas.pqr".to_string();
        let rendered = render_infile(&options);
        assert!(rendered.contains("    pdime 2 2 2\n"));
        assert!(rendered.contains("    ofrac 0.1\n"));
        assert!(rendered.contains("    async 3\n"));
        assert!(rendered.contains("    cglen "));
        assert!(rendered.contains("    fglen "));
    }

    #[test]
    fn mg_manual_uses_grid_centering() {
        let mut form = base_form();
        form.insert("type".into(), json!("mg-manual"));
        form.insert("glenx".into(), json!("60"));
        form.insert("gleny".into(), json!("60"));
        form.insert("glenz".into(), json!("60"));
        form.insert("gcent".into(), json!("coord"));
        form.insert("gxcent".into(), json!("10"));
        form.insert("gycent".into(), json!("11"));
        form.insert("gzcent".into(), json!("12"));
        let mut options = ApbsOptions::from_form(&form).unwrap();
        options.pqr_file_name = "1fas.pqr".to_string();
        let rendered = render_infile(&options);
        assert!(rendered.contains("    glen 60 60 60\n"));
        assert!(rendered.contains("    gcent 10 11 12\n"));
        assert!(!rendered.contains("cglen"));
        assert!(!rendered.contains("fgcent"));
    }

    #[test]
    fn ions_emitted_when_slot_complete() {
        let mut form = base_form();
        form.insert("charge0".into(), json!("1"));
        form.insert("conc0".into(), json!("0.15"));
        form.insert("radius0".into(), json!("2"));
        form.insert("charge1".into(), json!("-1"));
        form.insert("conc1".into(), json!("0.15"));
        // radius1 left empty: slot incomplete, not emitted
        let mut options = ApbsOptions::from_form(&form).unwrap();
        options.pqr_file_name = "1fas.pqr".to_string();
        assert_eq!(options.ions.len(), 1);
        let rendered = render_infile(&options);
        assert!(rendered.contains("    ion charge 1 conc 0.15 radius 2\n"));
    }

    #[test]
    fn output_scalar_unravels_into_write_fields() {
        let mut form = base_form();
        form.remove("writepot");
        form.insert("output_scalar".into(), json!(["writepot", "writecharge"]));
        let options = ApbsOptions::from_form(&form).unwrap();
        assert_eq!(options.writes, vec!["charge", "pot"]);
    }

    #[test]
    fn missing_pdb2pqrid_is_missing_files() {
        let mut form = base_form();
        form.remove("pdb2pqrid");
        match ApbsOptions::from_form(&form) {
            Err(TranslateError::MissingFiles(files)) => {
                assert_eq!(files, vec!["pdb2pqrid".to_string()])
            }
            other => panic!("expected MissingFiles, got {other:?}"),
        }
    }

    #[test]
    fn split_ext_behaves_like_splitext() {
        assert_eq!(split_ext("1fas.pqr"), ("1fas", ".pqr"));
        assert_eq!(split_ext("noext"), ("noext", ""));
        assert_eq!(split_ext(".hidden"), (".hidden", ""));
        assert_eq!(split_ext("a.b.c"), ("a.b", ".c"));
    }
}
