use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result, bail};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use polars::prelude::*;
use tempfile::NamedTempFile;
use tracing::debug;

const MISSING_TOKENS: [&str; 4] = ["", "NA", "NaN", "."];

/// Reads a table with a header row. The delimiter is taken from the first
/// line (tab, then comma, otherwise runs of whitespace); `.gz` and `.bz2`
/// files are decompressed first.
pub fn read_table(path: &Path) -> Result<DataFrame> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let df = if ext == "gz" || ext == "bz2" {
        let tmp = decompress_to_temp(path, &ext)?;
        read_table_plain(tmp.path())
    } else {
        read_table_plain(path)
    }
    .with_context(|| format!("read {}", path.display()))?;
    debug!("read {} rows x {} columns from {}", df.height(), df.width(), path.display());
    Ok(df)
}

/// Reads a model description, mapping I/O failures to a readable message.
pub fn read_model(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read model {}", path.display()))
}

fn read_table_plain(path: &Path) -> Result<DataFrame> {
    let delimiter = detect_delimiter(path)?;
    if delimiter == b' ' {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        return read_table_whitespace(file);
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(delimiter)
                .with_null_values(Some(NullValues::AllColumns(
                    MISSING_TOKENS.iter().map(|&t| t.into()).collect(),
                )))
                .with_missing_is_null(true),
        )
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

fn read_table_whitespace<R: Read>(reader: R) -> Result<DataFrame> {
    let mut reader = BufReader::new(reader);
    let mut header_line = String::new();
    reader.read_line(&mut header_line)?;
    if header_line.trim().is_empty() {
        bail!("empty file");
    }
    let headers: Vec<&str> = header_line.split_whitespace().collect();
    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        for col in columns.iter_mut() {
            col.push(fields.next().and_then(normalize_missing_token));
        }
    }

    let df = headers
        .iter()
        .zip(columns)
        .map(|(name, values)| typed_column(name, values))
        .collect::<DataFrame>();
    Ok(df)
}

/// Numeric when every present value parses as a float, text otherwise.
fn typed_column(name: &str, values: Vec<Option<String>>) -> Column {
    let parsed: Option<Vec<Option<f64>>> = values
        .iter()
        .map(|v| match v {
            Some(text) => text.parse::<f64>().ok().map(Some),
            None => Some(None),
        })
        .collect();
    match parsed {
        Some(numbers) => Column::new(name.into(), numbers),
        None => Column::new(name.into(), values),
    }
}

fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut first = String::new();
    reader.read_line(&mut first)?;
    if first.contains('\t') {
        return Ok(b'\t');
    }
    if first.contains(',') {
        return Ok(b',');
    }
    Ok(b' ')
}

fn decompress_to_temp(path: &Path, ext: &str) -> Result<NamedTempFile> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut decoder: Box<dyn Read> = match ext {
        "gz" => Box::new(GzDecoder::new(file)),
        "bz2" => Box::new(BzDecoder::new(file)),
        _ => Box::new(file),
    };
    let mut tmp = NamedTempFile::new()?;
    std::io::copy(&mut decoder, &mut tmp).with_context(|| format!("decompress {}", path.display()))?;
    Ok(tmp)
}

fn normalize_missing_token(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if MISSING_TOKENS.iter().any(|t| trimmed.eq_ignore_ascii_case(t)) {
        None
    } else {
        Some(trimmed.to_string())
    }
}
