use crate::consolidate::{ConsolidationReport, SummaryRow};
use crate::runner::RunReport;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;

/// Output format options
#[derive(Debug, Clone, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print the summary table in the specified format
pub fn print_summary(rows: &[SummaryRow], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_plain(rows),
        OutputFormat::Json => print_json(rows),
    }
}

/// Print summary rows in plain text format
fn print_plain(rows: &[SummaryRow]) {
    if rows.is_empty() {
        println!("No responses with text to summarise.");
        return;
    }

    println!(
        "{:<20} {:<20} {:>9} {:>9} {:>10} {:>8} {:>8} {:>6} {:>6}",
        "Topic", "Model", "Responses", "Numbers", "Chi2", "p", "Slope", "R2", "Types"
    );
    println!("{}", "-".repeat(104));

    for row in rows {
        let chi2 = row.benford.as_ref().map(|b| b.chi2);
        let p_value = row.benford.as_ref().and_then(|b| b.p_value);
        println!(
            "{:<20} {:<20} {:>9} {:>9} {:>10} {:>8} {:>8} {:>6} {:>6}",
            row.topic,
            row.model,
            row.n_responses,
            row.n_numbers,
            fixed(chi2, 3),
            fixed(p_value, 4),
            fixed(row.zipf.slope, 3),
            fixed(row.zipf.r2, 3),
            row.zipf.types.map_or_else(|| "-".to_string(), |t| t.to_string()),
        );
    }
}

fn fixed(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

/// Print summary rows in JSON format
fn print_json(rows: &[SummaryRow]) {
    match serde_json::to_string_pretty(rows) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing summary to JSON: {}", e),
    }
}

const TSV_HEADER: &[&str] = &[
    "topic", "model", "n_responses", "n_numbers", "obs_1", "obs_2", "obs_3", "obs_4", "obs_5",
    "obs_6", "obs_7", "obs_8", "obs_9", "exp_1", "exp_2", "exp_3", "exp_4", "exp_5", "exp_6",
    "exp_7", "exp_8", "exp_9", "chi2", "p_value", "zipf_slope", "zipf_r2", "zipf_types",
];

/// Render the summary table as tab-separated text; absent values are empty cells
pub fn render_summary_tsv(rows: &[SummaryRow]) -> String {
    let mut out = TSV_HEADER.join("\t");
    out.push('\n');

    for row in rows {
        let mut cells: Vec<String> = vec![
            tsv_text(&row.topic),
            tsv_text(&row.model),
            row.n_responses.to_string(),
            row.n_numbers.to_string(),
        ];
        match &row.benford {
            Some(benford) => {
                cells.extend(benford.observed.iter().map(u64::to_string));
                cells.extend(benford.expected.iter().map(f64::to_string));
                cells.push(benford.chi2.to_string());
                cells.push(cell(benford.p_value));
            }
            None => cells.extend(std::iter::repeat_n(String::new(), 20)),
        }
        cells.push(cell(row.zipf.slope));
        cells.push(cell(row.zipf.r2));
        cells.push(cell(row.zipf.types));
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

/// Escape the characters that would break a TSV row: tab, newline, carriage return and backslash
fn tsv_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn cell<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn write_summary_tsv(rows: &[SummaryRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, render_summary_tsv(rows))
        .with_context(|| format!("Failed to write summary to: {}", path.display()))
}

pub fn print_run_report(report: &RunReport) {
    println!("📊 COLLECTION");
    println!("-------------");
    println!("Planned units:      {}", report.planned);
    if report.skipped_existing > 0 {
        println!("Already recorded:   {}", report.skipped_existing);
    }
    println!("Selected units:     {}", report.selected);
    println!("Batches run:        {}/{}", report.batches_run, report.batches_total);
    println!("Succeeded:          {}", report.succeeded);
    println!("Failed:             {}", report.failed);
    println!("Cancelled:          {}", report.cancelled);
    println!("Records written:    {}", report.records_written);
}

pub fn print_consolidation_report(report: &ConsolidationReport) {
    println!("📝 CONSOLIDATION");
    println!("----------------");
    println!("Logs read:          {}", report.files_read);
    println!("Records read:       {}", report.records_read);
    println!("Duplicates dropped: {}", report.duplicates);
    println!("Malformed lines:    {}", report.malformed_lines);
    println!("Records kept:       {}", report.kept);
    println!("Unclassified:       {}", report.unclassified);
    for path in &report.unreadable {
        println!("Unreadable log:     {}", path.display());
    }
    println!();
}
