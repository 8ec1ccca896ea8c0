//! Formatted output helpers for CLI commands.

use serde::Serialize;

/// Formats a nanosecond count with the largest unit that keeps it above one
/// (e.g. "1.50 s", "12.30 ms").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_duration_ns(ns: u64) -> String {
    const US: u64 = 1_000;
    const MS: u64 = US * 1_000;
    const S: u64 = MS * 1_000;

    if ns >= S {
        format!("{:.2} s", ns as f64 / S as f64)
    } else if ns >= MS {
        format!("{:.2} ms", ns as f64 / MS as f64)
    } else if ns >= US {
        format!("{:.2} us", ns as f64 / US as f64)
    } else {
        format!("{ns} ns")
    }
}

/// Renders left-aligned columns sized to their widest cell.
#[must_use]
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        padded.join("  ").trim_end().to_string()
    };
    let mut out = line(headers.to_vec());
    for row in rows {
        out.push('\n');
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

/// Prints a table to stdout.
#[allow(clippy::print_stdout)]
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    println!("{}", render_table(headers, rows));
}

/// Prints `value` as pretty JSON to stdout.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
#[allow(clippy::print_stdout)]
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints a plain line to stdout.
#[allow(clippy::print_stdout)]
pub fn print_line(line: &str) {
    println!("{line}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_picks_unit() {
        assert_eq!(format_duration_ns(800), "800 ns");
        assert_eq!(format_duration_ns(2_500), "2.50 us");
        assert_eq!(format_duration_ns(12_300_000), "12.30 ms");
        assert_eq!(format_duration_ns(1_500_000_000), "1.50 s");
    }

    #[test]
    fn table_columns_align() {
        let table = render_table(
            &["CORE", "RUNTIME"],
            &[
                vec!["0".into(), "950000".into()],
                vec!["12".into(), "0".into()],
            ],
        );
        assert_eq!(table, "CORE  RUNTIME\n0     950000\n12    0");
    }
}
