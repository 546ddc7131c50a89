/// Per-stage summary tables.
///
/// One row per processed transmitter plus an optional TOTAL row, written
/// with `csv::Writer` and echoed to the console.

use std::path::Path;

use csv::Writer;

use crate::error::TrackResult;

/// Stem suffix shared by every summary table so track discovery skips them.
pub const SUMMARY_SUFFIX: &str = "_summary";

/// Statistics record that can be laid out as one summary table row.
pub trait SummaryRow {
    fn headers() -> Vec<&'static str>;

    fn row(&self) -> Vec<String>;

    /// Aggregated TOTAL row for a whole batch; `None` when the table has none.
    fn totals(_rows: &[Self]) -> Option<Vec<String>>
    where
        Self: Sized,
    {
        None
    }
}

pub fn write_summary<T: SummaryRow>(rows: &[T], output_path: &Path) -> TrackResult<()> {
    let mut wtr = Writer::from_path(output_path)?;

    wtr.write_record(T::headers())?;
    for row in rows {
        wtr.write_record(row.row())?;
    }
    if let Some(totals) = T::totals(rows) {
        wtr.write_record(totals)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Console rendering of a summary table.
pub fn print_summary<T: SummaryRow>(title: &str, rows: &[T]) {
    let headers = T::headers();
    let mut lines: Vec<Vec<String>> = rows.iter().map(|r| r.row()).collect();
    if let Some(totals) = T::totals(rows) {
        lines.push(totals);
    }

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            lines
                .iter()
                .filter_map(|l| l.get(i))
                .map(|v| v.len())
                .max()
                .unwrap_or(0)
                .max(h.len())
        })
        .collect();

    let render = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:>width$}", c, width = w))
            .collect::<Vec<_>>()
            .join("  ")
    };

    let header_line = render(headers.iter().map(|h| h.to_string()).collect());
    println!("\n📊 {}", title);
    println!("{}", "=".repeat(header_line.len().max(title.len() + 3)));
    println!("{}", header_line);
    for line in lines {
        println!("{}", render(line));
    }
}

/// Percentage of `part` in `whole` rounded to one decimal, 0 for an empty whole.
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round_to(part as f64 / whole as f64 * 100.0, 1)
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
