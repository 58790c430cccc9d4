//! Grain table parameter rescaling.
//!
//! A grain table is line-oriented text; the luma AR coefficient records are
//! the `\tcY <int> <int> ...` lines and byte format matters downstream, so
//! everything else passes through untouched (line endings normalized to
//! `\n`).

use std::{
    borrow::Cow,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static LUMA_COEFFS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\tcY (.+)$").expect("regex is valid"));

/// Scale the luma coefficients of a single table line, or return the line
/// unchanged when it is not a luma record.
#[inline]
pub fn scale_table_line(line: &str, scale: f64) -> Result<Cow<'_, str>> {
    let Some(captures) = LUMA_COEFFS_RE.captures(line) else {
        return Ok(Cow::Borrowed(line));
    };
    let raw = captures.get(1).map_or("", |m| m.as_str());

    let mut scaled = Vec::new();
    for param in raw.split(' ') {
        let value: i64 = param
            .parse()
            .with_context(|| format!("Invalid luma coefficient {param:?} in grain table"))?;
        scaled.push(((value as f64 * scale).round() as i64).to_string());
    }

    Ok(Cow::Owned(format!("\tcY {}", scaled.join(" "))))
}

#[inline]
pub fn scale_noise_model(input: &Path, output: &Path, scale: f64) -> Result<()> {
    let reader = BufReader::new(
        File::open(input)
            .with_context(|| format!("Failed to open grain table {}", input.display()))?,
    );
    let mut writer = BufWriter::new(
        File::create(output)
            .with_context(|| format!("Failed to create grain table {}", output.display()))?,
    );

    for line in reader.lines() {
        let line = line?;
        let scaled = scale_table_line(&line, scale)
            .with_context(|| format!("Failed to scale {}", input.display()))?;
        writer.write_all(scaled.as_bytes())?;
        writer.write_all(b"\n")?;
    }

    writer.flush()?;
    Ok(())
}

/// Scale every grain table in a directory into `out_dir`, keeping file
/// names. Returns the number of tables written.
#[inline]
pub fn scale_noise_models(input_dir: &Path, out_dir: &Path, scale: f64) -> Result<usize> {
    crate::create_dir!(out_dir)?;

    let mut written = 0usize;
    let mut entries: Vec<_> = fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read table directory {}", input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "table"))
        .collect();
    entries.sort_unstable();

    for table in entries {
        let Some(name) = table.file_name() else { continue };
        debug!("scaling {name:?} by {scale}");
        scale_noise_model(&table, &out_dir.join(name), scale)?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn scales_luma_coefficient_lines() {
        let scaled = scale_table_line("\tcY 10 20 30", 0.8).expect("scale");
        assert_eq!(scaled, "\tcY 8 16 24");
    }

    #[test]
    fn rounds_to_nearest_and_keeps_signs() {
        let scaled = scale_table_line("\tcY -1 3 -25 0", 0.8).expect("scale");
        assert_eq!(scaled, "\tcY -1 2 -20 0");
    }

    #[test]
    fn identity_scale_preserves_numeric_content() {
        let line = "\tcY 12 -7 0 133";
        assert_eq!(scale_table_line(line, 1.0).expect("scale"), line);
    }

    #[test]
    fn non_luma_lines_pass_through_untouched() {
        for line in [
            "filmgrn1",
            "E 0 417083 1 7391 1",
            "\tp 3 7 0 11 0 1 128 192 256 128 192 256",
            "\tcCb 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 64",
            "\tsY 14  0 20 20 5 39 4",
            "",
        ] {
            let result = scale_table_line(line, 0.8).expect("scale");
            assert!(matches!(result, Cow::Borrowed(_)));
            assert_eq!(result, line);
        }
    }

    #[test]
    fn rejects_malformed_luma_records() {
        assert!(scale_table_line("\tcY 10 twenty 30", 0.8).is_err());
    }

    #[test]
    fn file_scaling_normalizes_line_endings() {
        let dir = TempDir::new().expect("tempdir");
        let input = dir.path().join("00000.table");
        let output = dir.path().join("00000_scaled.table");
        fs::write(&input, "filmgrn1\r\nE 0 417083 1 7391 1\r\n\tcY 10 20 30\r\n")
            .expect("write");

        scale_noise_model(&input, &output, 0.8).expect("scale");

        let scaled = fs::read_to_string(&output).expect("read");
        assert_eq!(scaled, "filmgrn1\nE 0 417083 1 7391 1\n\tcY 8 16 24\n");
    }

    #[test]
    fn unity_scale_round_trips_a_table_file() {
        let dir = TempDir::new().expect("tempdir");
        let input = dir.path().join("00000.table");
        let output = dir.path().join("00000_out.table");
        let contents = "filmgrn1\n\tp 3 7 0 11 0 1\n\tcY -1 2 -20 0\n\tcCr 5 5\n";
        fs::write(&input, contents).expect("write");

        scale_noise_model(&input, &output, 1.0).expect("scale");
        assert_eq!(fs::read_to_string(&output).expect("read"), contents);
    }

    #[test]
    fn directory_scaling_processes_every_table() {
        let dir = TempDir::new().expect("tempdir");
        let out = dir.path().join("scaled");
        for name in ["00000.table", "00001.table"] {
            fs::write(dir.path().join(name), "\tcY 10\n").expect("write");
        }
        fs::write(dir.path().join("notes.txt"), "not a table").expect("write");

        let written = scale_noise_models(dir.path(), &out, 0.5).expect("scale dir");

        assert_eq!(written, 2);
        assert_eq!(fs::read_to_string(out.join("00000.table")).expect("read"), "\tcY 5\n");
        assert!(!out.join("notes.txt").exists());
    }
}
