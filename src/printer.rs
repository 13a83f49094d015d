use std::io::{self, Write};

use polars::prelude::*;

use crate::error::Result;
use crate::record::ResultRecord;

const BANNER_WIDTH: usize = 60;

/// Writes the report for `results` to stdout.
pub fn print_results(results: &ResultRecord) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_results(&mut out, results)?;
    out.flush()?;
    Ok(())
}

pub fn write_results<W: Write>(out: &mut W, results: &ResultRecord) -> Result<()> {
    let banner = "=".repeat(BANNER_WIDTH);
    writeln!(out, "{banner}")?;
    writeln!(out, "PLS-SEM Model Results")?;
    writeln!(out, "{banner}")?;

    writeln!(out, "\nParameter Estimates:")?;
    writeln!(out, "{}", render_table(results.estimates()))?;

    writeln!(out, "\nModel Statistics:")?;
    for (name, value) in results.stats().iter() {
        writeln!(out, "  {name}: {value}")?;
    }
    Ok(())
}

/// Renders a frame as a right-aligned text table with a leading row index.
/// Nulls show as `-`, floats with six decimals.
pub fn render_table(frame: &DataFrame) -> String {
    let height = frame.height();
    let mut columns: Vec<Vec<String>> = Vec::with_capacity(frame.width() + 1);
    let mut index = vec![String::new()];
    index.extend((0..height).map(|i| i.to_string()));
    columns.push(index);

    for column in frame.get_columns() {
        let mut cells = Vec::with_capacity(height + 1);
        cells.push(column.name().to_string());
        for i in 0..height {
            cells.push(column.get(i).map_or_else(|_| "-".to_string(), |v| format_cell(&v)));
        }
        columns.push(cells);
    }

    let widths: Vec<usize> = columns
        .iter()
        .map(|cells| cells.iter().map(|c| c.chars().count()).max().unwrap_or(0))
        .collect();

    let mut lines = Vec::with_capacity(height + 1);
    for row in 0..=height {
        let line = columns
            .iter()
            .zip(&widths)
            .map(|(cells, &width)| format!("{:>width$}", cells[row]))
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(line.trim_end().to_string());
    }
    lines.join("\n")
}

fn format_cell(value: &AnyValue<'_>) -> String {
    match value {
        AnyValue::Null => "-".to_string(),
        AnyValue::Float64(v) => format!("{v:.6}"),
        AnyValue::Float32(v) => format!("{v:.6}"),
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        other => other.to_string(),
    }
}
