//! Text-level helpers for tool-A input files: READ-section extraction, water
//! stripping, and the `%g`-style float formatting the legacy renderer used.
//! Downstream parsers reject reordered or reformatted files, so output must be
//! byte-exact.

/// Extracts the data files referenced in the READ section of an input file.
///
/// The section starts at the first line whose leading token is `READ`
/// (case-insensitive) and ends at the next `END`. Every other non-comment line
/// inside it contributes its third and following tokens, in order; tokens
/// after an inline `#` are ignored. Duplicates are preserved.
pub fn extract_input_files(infile_text: &str) -> Vec<String> {
    let mut read_start = false;
    let mut read_end = false;
    let mut file_list = Vec::new();

    for whole_line in infile_text.lines() {
        let line = whole_line.trim();
        if read_start && read_end {
            break;
        }
        if line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if !read_start {
            match tokens[0].to_uppercase().as_str() {
                "READ" => read_start = true,
                "END" => read_end = true,
                _ => {}
            }
        } else if tokens[0].to_uppercase() == "END" {
            read_end = true;
        } else {
            for arg in tokens.iter().skip(2) {
                if arg.starts_with('#') {
                    break;
                }
                file_list.push((*arg).to_string());
            }
        }
    }

    file_list
}

/// Drops every line mentioning crystallographic water (`WAT` or `HOH`),
/// preserving the newlines of the remaining lines exactly.
pub fn strip_water(pqr_text: &str) -> String {
    pqr_text
        .split_inclusive('\n')
        .filter(|line| !line.contains("WAT") && !line.contains("HOH"))
        .collect()
}

/// Formats a float the way C's `%g` does: six significant digits, trailing
/// zeros stripped, scientific notation outside the `1e-4..1e6` magnitude
/// window.
pub fn fmt_g(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let exponent = value.abs().log10().floor() as i32;
    if (-4..6).contains(&exponent) {
        let precision = (5 - exponent).max(0) as usize;
        let mut text = format!("{value:.precision$}");
        if text.contains('.') {
            while text.ends_with('0') {
                text.pop();
            }
            if text.ends_with('.') {
                text.pop();
            }
        }
        text
    } else {
        let scientific = format!("{value:.5e}");
        let (mantissa, exp) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
        let mut mantissa = mantissa.to_string();
        if mantissa.contains('.') {
            while mantissa.ends_with('0') {
                mantissa.pop();
            }
            if mantissa.ends_with('.') {
                mantissa.pop();
            }
        }
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_section_with_inline_comment() {
        let text = "read\n  mol pqr foo.pqr bar.pqr # inline\n# commented\nend\n";
        assert_eq!(extract_input_files(text), vec!["foo.pqr", "bar.pqr"]);
    }

    #[test]
    fn read_section_stops_at_end() {
        let text = "# header\nread\n  mol pqr a.pqr\n  mol pqr b.pqr\nend\nelec\n  mol pqr c.pqr\nend\n";
        assert_eq!(extract_input_files(text), vec!["a.pqr", "b.pqr"]);
    }

    #[test]
    fn no_read_section_yields_empty_list() {
        assert_eq!(extract_input_files("elec\n  mg-auto\nend\nquit"), Vec::<String>::new());
        assert_eq!(extract_input_files("end\nread\n  mol pqr a.pqr\nend"), Vec::<String>::new());
    }

    #[test]
    fn duplicates_and_order_preserved() {
        let text = "READ\n  mol pqr x.pqr x.pqr\nEND\n";
        assert_eq!(extract_input_files(text), vec!["x.pqr", "x.pqr"]);
    }

    #[test]
    fn water_lines_removed() {
        let text = "ATOM 1 O WAT 1\nATOM 2 O HOH 2\nATOM 3 N SER 3\n";
        assert_eq!(strip_water(text), "ATOM 3 N SER 3\n");
    }

    #[test]
    fn water_filter_keeps_missing_trailing_newline() {
        let text = "ATOM 1 N SER 1\nATOM 2 O HOH 2";
        assert_eq!(strip_water(text), "ATOM 1 N SER 1\n");
        let text = "ATOM 1 O HOH 1\nATOM 2 N SER 2";
        assert_eq!(strip_water(text), "ATOM 2 N SER 2");
    }

    #[test]
    fn g_formatting_matches_legacy_renderer() {
        assert_eq!(fmt_g(0.0), "0");
        assert_eq!(fmt_g(2.0), "2");
        assert_eq!(fmt_g(0.15), "0.15");
        assert_eq!(fmt_g(78.54), "78.54");
        assert_eq!(fmt_g(310.0), "310");
        assert_eq!(fmt_g(298.15), "298.15");
        assert_eq!(fmt_g(-1.5), "-1.5");
        assert_eq!(fmt_g(0.00001), "1e-05");
        assert_eq!(fmt_g(10000000.0), "1e+07");
        assert_eq!(fmt_g(123456789.0), "1.23457e+08");
    }
}
