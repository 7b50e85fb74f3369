//! Conversion reports
//!
//! Renders a [`BatchSummary`] as a human-readable report, JSON, or a single
//! summary line.

use std::time::Duration;

use crate::batch::{BatchSummary, ConversionOutcome, ConversionProgress};
use crate::cli::{OutputFormat, VerbosityLevel};
use crate::schema::SchemaTable;

/// Output formatter for conversion results
pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            format: OutputFormat::Human,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

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

    /// Render a summary in the configured format
    pub fn render(&self, summary: &BatchSummary) -> Result<String, serde_json::Error> {
        match self.format {
            OutputFormat::Human => Ok(self.format_results(summary)),
            OutputFormat::Json => serde_json::to_string_pretty(summary).map(|mut s| {
                s.push('\n');
                s
            }),
            OutputFormat::Summary => Ok(self.format_summary_line(summary)),
        }
    }

    pub fn format_results(&self, summary: &BatchSummary) -> String {
        let mut output = String::new();

        match self.verbosity {
            VerbosityLevel::Quiet => {
                if summary.failed > 0 {
                    output.push_str(&format!("Failed: {}\n", summary.failed));
                    for name in &summary.failed_files {
                        output.push_str(&format!("  {}\n", name));
                    }
                }
            }
            VerbosityLevel::Normal | VerbosityLevel::Verbose | VerbosityLevel::Debug => {
                if self.verbosity >= VerbosityLevel::Verbose {
                    for outcome in &summary.outcomes {
                        output.push_str(&self.format_outcome(outcome));
                        output.push('\n');
                    }
                } else {
                    for outcome in summary.failures() {
                        output.push_str(&self.format_outcome(outcome));
                        output.push('\n');
                    }
                }

                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&self.format_summary(summary));
            }
        }

        output
    }

    pub fn format_outcome(&self, outcome: &ConversionOutcome) -> String {
        let duration_str = format_duration(outcome.duration);

        if outcome.success {
            let mut line = format!(
                "{}  {} ({}) - {} record{}",
                self.colorize("✓ OK", "32"),
                outcome.input_path.display(),
                duration_str,
                outcome.record_count,
                if outcome.record_count == 1 { "" } else { "s" }
            );
            if self.verbosity == VerbosityLevel::Debug {
                line.push_str(&format!(" -> {}", outcome.output_path.display()));
            }
            line
        } else {
            format!(
                "{}  {} ({}) - {}",
                self.colorize("✗ FAILED", "31"),
                outcome.input_path.display(),
                duration_str,
                outcome.error.as_deref().unwrap_or("unknown error")
            )
        }
    }

    fn format_summary(&self, summary: &BatchSummary) -> String {
        let mut output = String::new();
        output.push_str("Conversion Summary:\n");
        output.push_str(&format!("  Total files: {}\n", summary.total_files));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Converted:", "32"),
            summary.succeeded
        ));
        if summary.failed > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Failed:", "31"),
                summary.failed
            ));
        }
        output.push_str(&format!("  Records: {}\n", summary.total_records));
        output.push_str(&format!("  Success rate: {:.1}%\n", summary.success_rate()));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(summary.duration)
        ));

        if self.verbosity == VerbosityLevel::Debug {
            output.push_str(&format!(
                "  Started: {}\n",
                summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }

        output
    }

    fn format_summary_line(&self, summary: &BatchSummary) -> String {
        format!(
            "{} files, {} converted, {} failed, {} records in {}\n",
            summary.total_files,
            summary.succeeded,
            summary.failed,
            summary.total_records,
            format_duration(summary.duration)
        )
    }

    pub fn format_progress(&self, progress: &ConversionProgress) -> String {
        format!(
            "[{}/{}] {}",
            progress.completed,
            progress.total,
            progress.current_file.display()
        )
    }
}

/// Pretty JSON listing of a resolved schema table, sorted by record type
pub fn render_schema_table(table: &SchemaTable) -> Result<String, serde_json::Error> {
    let record_types: Vec<_> = table
        .record_type_names()
        .into_iter()
        .filter_map(|name| table.get(name))
        .collect();
    serde_json::to_string_pretty(&record_types)
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
