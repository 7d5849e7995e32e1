//! Output and reporting
//!
//! Renders [`ValidationResults`] as human-readable text, a JSON report or a
//! bare summary, and renders `--select` query results.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::diagnostic::Diagnostic;
use crate::validator::{
    FileValidationResult, PerformanceMetrics, ValidationResults, ValidationStatus,
};

/// Result items of a `--select` query for one file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub path: PathBuf,
    /// String values of each non-empty result, one entry per context node
    pub results: Vec<Vec<String>>,
    /// Set when the file could not be queried
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    timestamp: String,
    schema: &'a str,
    summary: JsonSummary,
    files: Vec<JsonFile<'a>>,
}

#[derive(Serialize)]
struct JsonSummary {
    total_files: usize,
    valid_files: usize,
    invalid_files: usize,
    error_files: usize,
    skipped_files: usize,
    total_diagnostics: usize,
    success_rate: f64,
    duration_ms: u128,
}

#[derive(Serialize)]
struct JsonFile<'a> {
    path: String,
    #[serde(flatten)]
    status: &'a ValidationStatus,
    duration_ms: u128,
    diagnostics: &'a [Diagnostic],
}

/// Output formatter for validation results
pub struct Output {
    format: OutputFormat,
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbosity: VerbosityLevel) -> Self {
        Self {
            format,
            verbosity,
            show_colors: format == OutputFormat::Human && atty::is(atty::Stream::Stdout),
        }
    }

    /// Force colours on or off
    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    /// Render the results of a validation run against schema `title`
    pub fn format_results(&self, title: &str, results: &ValidationResults) -> String {
        match self.format {
            OutputFormat::Human => self.format_human(results),
            OutputFormat::Json => format_json(title, results),
            OutputFormat::Summary => self.format_summary(results),
        }
    }

    fn format_human(&self, results: &ValidationResults) -> String {
        let mut output = String::new();

        for file_result in &results.file_results {
            if file_result.status.is_valid() && self.verbosity < VerbosityLevel::Verbose {
                continue;
            }
            if file_result.status.is_skipped() && self.verbosity == VerbosityLevel::Quiet {
                continue;
            }
            output.push_str(&self.format_file_result(file_result));
            output.push('\n');
        }

        if self.verbosity > VerbosityLevel::Quiet {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&self.format_summary(results));
        }

        output
    }

    pub fn format_file_result(&self, result: &FileValidationResult) -> String {
        let path_display = result.path.display();
        let duration_str = format_duration(result.duration);

        match &result.status {
            ValidationStatus::Valid => format!(
                "{}  {} ({})",
                self.colorize("✓ VALID", "32"),
                path_display,
                duration_str
            ),
            ValidationStatus::Invalid { error_count } => {
                let mut output = format!(
                    "{}  {} ({}) - {} finding{}",
                    self.colorize("✗ INVALID", "31"),
                    path_display,
                    duration_str,
                    error_count,
                    if *error_count == 1 { "" } else { "s" }
                );
                for diagnostic in &result.diagnostics {
                    output.push_str(&format!("\n    {}", diagnostic));
                }
                output
            }
            ValidationStatus::Error { message } => format!(
                "{}  {} ({}) - {}",
                self.colorize("⚠ ERROR", "33"),
                path_display,
                duration_str,
                message
            ),
            ValidationStatus::Skipped { reason } => format!(
                "{}  {} - {}",
                self.colorize("- SKIPPED", "36"),
                path_display,
                reason
            ),
        }
    }

    fn format_summary(&self, results: &ValidationResults) -> String {
        let mut output = String::new();
        output.push_str("Validation Summary:\n");
        output.push_str(&format!("  Total files: {}\n", results.total_files));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Valid:", "32"),
            results.valid_files
        ));

        if results.invalid_files > 0 {
            output.push_str(&format!(
                "  {} {} ({} findings)\n",
                self.colorize("Invalid:", "31"),
                results.invalid_files,
                results.total_diagnostics
            ));
        }
        if results.error_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Errors:", "33"),
                results.error_files
            ));
        }
        if results.skipped_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Skipped:", "36"),
                results.skipped_files
            ));
        }

        output.push_str(&format!("  Success rate: {:.1}%\n", results.success_rate()));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.performance_metrics.total_duration)
        ));

        if self.verbosity >= VerbosityLevel::Verbose {
            output.push_str(&format_performance_metrics(&results.performance_metrics));
        }

        output
    }

    /// Render `--select` results
    pub fn format_query_results(&self, results: &[QueryResult]) -> String {
        if self.format == OutputFormat::Json {
            return serde_json::to_string_pretty(results).unwrap_or_default();
        }

        let mut output = String::new();
        for result in results {
            if let Some(error) = &result.error {
                output.push_str(&format!(
                    "{}  {} - {}\n",
                    self.colorize("⚠ ERROR", "33"),
                    result.path.display(),
                    error
                ));
                continue;
            }
            if self.format == OutputFormat::Summary {
                output.push_str(&format!(
                    "{}: {} result{}\n",
                    result.path.display(),
                    result.results.len(),
                    if result.results.len() == 1 { "" } else { "s" }
                ));
                continue;
            }
            for items in &result.results {
                for item in items {
                    output.push_str(&format!("{}: {}\n", result.path.display(), item));
                }
            }
        }
        output
    }
}

fn format_json(title: &str, results: &ValidationResults) -> String {
    let report = JsonReport {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        schema: title,
        summary: JsonSummary {
            total_files: results.total_files,
            valid_files: results.valid_files,
            invalid_files: results.invalid_files,
            error_files: results.error_files,
            skipped_files: results.skipped_files,
            total_diagnostics: results.total_diagnostics,
            success_rate: results.success_rate(),
            duration_ms: results.performance_metrics.total_duration.as_millis(),
        },
        files: results
            .file_results
            .iter()
            .map(|result| JsonFile {
                path: result.path.display().to_string(),
                status: &result.status,
                duration_ms: result.duration.as_millis(),
                diagnostics: &result.diagnostics,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report).unwrap_or_default()
}

fn format_performance_metrics(metrics: &PerformanceMetrics) -> String {
    let mut output = String::new();
    output.push_str("\nPerformance Metrics:\n");
    output.push_str(&format!(
        "  Discovery: {}\n",
        format_duration(metrics.discovery_duration)
    ));
    output.push_str(&format!(
        "  Validation: {}\n",
        format_duration(metrics.validation_duration)
    ));
    output.push_str(&format!(
        "  Throughput: {:.1} files/sec\n",
        metrics.throughput_files_per_second
    ));
    output.push_str(&format!(
        "  Concurrent validations: {}\n",
        metrics.concurrent_validations
    ));
    output
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
