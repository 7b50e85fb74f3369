//! Directory-wide conversion
//!
//! Every matching file under the source directory is converted to a file at
//! the mirrored relative path under the output directory. Files are converted
//! concurrently up to a bounded worker count:
//! - **Async orchestration**: discovery and task fan-out run on tokio
//! - **Blocking work**: each file is parsed and written on `spawn_blocking`
//! - **Bounded concurrency**: a semaphore caps the number of files in flight
//!
//! A failing file is recorded in the [`BatchSummary`] and never stops its
//! siblings. Cancellation is the exception and is returned as an error.

use futures::future::try_join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::converter::XmlToCsvConverter;
use crate::error::{ConversionError, Result};
use crate::file_discovery::FileDiscovery;

/// Batch configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Number of files converted at the same time
    pub max_concurrent_conversions: usize,
    /// Extension given to output files
    pub output_extension: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_conversions: num_cpus::get(),
            output_extension: "csv".to_string(),
        }
    }
}

/// Result of converting one file
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub success: bool,
    pub record_count: u64,
    /// Failure message when `success` is false
    pub error: Option<String>,
    pub duration: Duration,
}

impl ConversionOutcome {
    pub fn converted(
        input_path: PathBuf,
        output_path: PathBuf,
        record_count: u64,
        duration: Duration,
    ) -> Self {
        Self {
            input_path,
            output_path,
            success: true,
            record_count,
            error: None,
            duration,
        }
    }

    pub fn failed(
        input_path: PathBuf,
        output_path: PathBuf,
        error: &ConversionError,
        duration: Duration,
    ) -> Self {
        Self {
            input_path,
            output_path,
            success: false,
            record_count: 0,
            error: Some(error.to_string()),
            duration,
        }
    }

    /// File name of the input, as shown in the failing-file list
    pub fn file_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_path.display().to_string())
    }
}

/// Aggregate tally of a directory conversion
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// File names of the failed inputs, in input path order
    pub failed_files: Vec<String>,
    pub total_records: u64,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    /// Per-file outcomes sorted by input path
    pub outcomes: Vec<ConversionOutcome>,
}

impl BatchSummary {
    /// Aggregate per-file outcomes into a summary
    pub fn aggregate(
        mut outcomes: Vec<ConversionOutcome>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        outcomes.sort_by(|a, b| a.input_path.cmp(&b.input_path));

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let failed_files: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.success)
            .map(ConversionOutcome::file_name)
            .collect();
        let total_records = outcomes.iter().map(|o| o.record_count).sum();

        Self {
            total_files: outcomes.len(),
            succeeded,
            failed: failed_files.len(),
            failed_files,
            total_records,
            duration,
            started_at,
            outcomes,
        }
    }

    /// True when every discovered file converted; an empty batch counts as success
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.succeeded as f64 / self.total_files as f64) * 100.0
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConversionOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}

/// Progress update after each finished file
#[derive(Debug, Clone)]
pub struct ConversionProgress {
    pub current_file: PathBuf,
    pub completed: usize,
    pub total: usize,
}

/// Progress callback type for batch updates
pub type ProgressCallback = Arc<dyn Fn(ConversionProgress) + Send + Sync>;

/// Converts every matching file of a directory tree
pub struct DirectoryConverter {
    converter: XmlToCsvConverter,
    discovery: FileDiscovery,
    config: BatchConfig,
    cancel: CancellationToken,
}

impl DirectoryConverter {
    pub fn new(converter: XmlToCsvConverter) -> Self {
        Self {
            converter,
            discovery: FileDiscovery::new(),
            config: BatchConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_discovery(mut self, discovery: FileDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a cancellation token with the caller
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn converter(&self) -> &XmlToCsvConverter {
        &self.converter
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Convert every matching file under `xml_dir` into `csv_dir`
    pub async fn convert_directory(&self, xml_dir: &Path, csv_dir: &Path) -> Result<BatchSummary> {
        self.convert_directory_with_progress(xml_dir, csv_dir, None)
            .await
    }

    /// Convert a directory, reporting each finished file to `progress_callback`
    pub async fn convert_directory_with_progress(
        &self,
        xml_dir: &Path,
        csv_dir: &Path,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<BatchSummary> {
        let is_dir = tokio::fs::metadata(xml_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(ConversionError::SourceDirectoryNotFound {
                path: xml_dir.to_path_buf(),
            });
        }

        let started_at = Utc::now();
        let start = Instant::now();

        let files = self.discovery.discover_files(xml_dir).await?;
        info!(
            files = files.len(),
            source = %xml_dir.display(),
            target = %csv_dir.display(),
            "Converting directory"
        );

        let jobs = files
            .into_iter()
            .map(|input| {
                let output = self.mirrored_output_path(xml_dir, csv_dir, &input);
                (input, output)
            })
            .collect();
        let (jobs, collisions) = split_collisions(jobs);

        let mut outcomes = self.convert_files(jobs, progress_callback).await?;
        outcomes.extend(collisions);
        let summary = BatchSummary::aggregate(outcomes, started_at, start.elapsed());

        if !summary.failed_files.is_empty() {
            warn!(
                failed = summary.failed,
                files = %summary.failed_files.join(", "),
                "Failed to convert files"
            );
        }
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            records = summary.total_records,
            duration_ms = summary.duration.as_millis() as u64,
            "Directory conversion finished"
        );

        Ok(summary)
    }

    /// Convert `(input, output)` pairs concurrently
    pub async fn convert_files(
        &self,
        jobs: Vec<(PathBuf, PathBuf)>,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<Vec<ConversionOutcome>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let total = jobs.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_concurrent_conversions.max(1),
        ));

        let tasks: Vec<_> = jobs
            .into_iter()
            .map(|(input, output)| {
                let converter = self.converter.clone();
                let semaphore = Arc::clone(&semaphore);
                let cancel = self.cancel.clone();
                let progress_callback = progress_callback.clone();
                let completed = Arc::clone(&completed);

                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.map_err(|_| {
                        ConversionError::Concurrency {
                            details: "Failed to acquire conversion semaphore".to_string(),
                        }
                    })?;

                    if cancel.is_cancelled() {
                        return Err(ConversionError::Cancelled);
                    }

                    let start = Instant::now();
                    let outcome = match converter.convert_file(&input, &output, &cancel).await {
                        Ok(records) => {
                            ConversionOutcome::converted(input, output, records, start.elapsed())
                        }
                        Err(err) if err.is_cancellation() => return Err(err),
                        Err(err) => {
                            error!(file = %input.display(), error = %err, "Conversion failed");
                            ConversionOutcome::failed(input, output, &err, start.elapsed())
                        }
                    };

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = progress_callback {
                        callback(ConversionProgress {
                            current_file: outcome.input_path.clone(),
                            completed: done,
                            total,
                        });
                    }

                    Ok::<ConversionOutcome, ConversionError>(outcome)
                })
            })
            .collect();

        let task_results = try_join_all(tasks)
            .await
            .map_err(|e| ConversionError::Concurrency {
                details: format!("Task join error: {}", e),
            })?;

        task_results.into_iter().collect()
    }

    /// Output path mirroring `input`'s position below `xml_dir`
    pub fn mirrored_output_path(&self, xml_dir: &Path, csv_dir: &Path, input: &Path) -> PathBuf {
        let relative = input.strip_prefix(xml_dir).unwrap_or(input);
        let relative = match relative.file_name() {
            Some(_) => relative.to_path_buf(),
            None => PathBuf::from(input.file_name().unwrap_or_default()),
        };
        csv_dir
            .join(relative)
            .with_extension(&self.config.output_extension)
    }
}

/// Separate jobs whose output path is shared with another input, such as
/// `X.xml` and `X.XML` in one directory. Those fail without being converted.
fn split_collisions(
    jobs: Vec<(PathBuf, PathBuf)>,
) -> (Vec<(PathBuf, PathBuf)>, Vec<ConversionOutcome>) {
    let mut sources: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    for (input, output) in &jobs {
        sources.entry(output.clone()).or_default().push(input.clone());
    }

    let mut unique = Vec::with_capacity(jobs.len());
    let mut collisions = Vec::new();
    for (input, output) in jobs {
        let other = sources
            .get(&output)
            .and_then(|inputs| inputs.iter().find(|other| **other != input))
            .cloned();
        match other {
            None => unique.push((input, output)),
            Some(other) => {
                let err = ConversionError::OutputCollision {
                    output: output.clone(),
                    other,
                };
                warn!(file = %input.display(), error = %err, "Skipping file");
                collisions.push(ConversionOutcome::failed(input, output, &err, Duration::ZERO));
            }
        }
    }

    (unique, collisions)
}
