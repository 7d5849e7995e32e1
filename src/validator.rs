//! Batch validation engine
//!
//! Validates every discovered file against one compiled [`Schema`]:
//! - **Async I/O**: file discovery and file reads run on the tokio runtime
//! - **Blocking interpretation**: each document is parsed and checked inside
//!   `spawn_blocking`, one independent validation call per file
//! - **Bounded concurrency**: a semaphore caps the number of files in flight
//!
//! Results come back in discovery order no matter which task finishes first.

use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{Config, ConfigManager};
use crate::diagnostic::Diagnostic;
use crate::error::{Result, ValidationError};
use crate::file_discovery::FileDiscovery;
use crate::schema::Schema;
use crate::schematron::ValidationOptions;

const FAIL_FAST_REASON: &str = "fail-fast: an earlier file did not validate";

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    /// Number of files validated at the same time
    pub max_concurrent_validations: usize,
    /// Timeout for one file
    pub validation_timeout: Duration,
    /// Skip files not yet started once a file fails
    pub fail_fast: bool,
    /// Show progress indicators
    pub show_progress: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_validations: num_cpus::get(),
            validation_timeout: Duration::from_secs(300),
            fail_fast: false,
            show_progress: false,
        }
    }
}

impl From<&Config> for ValidationConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent_validations: ConfigManager::get_thread_count(config),
            validation_timeout: ConfigManager::get_timeout_duration(config),
            fail_fast: config.validation.fail_fast,
            show_progress: config.validation.show_progress,
        }
    }
}

/// Status of a single file validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ValidationStatus {
    /// No rule fired
    Valid,
    /// At least one rule fired
    Invalid { error_count: usize },
    /// The document could not be validated
    Error { message: String },
    /// The file was never validated
    Skipped { reason: String },
}

impl ValidationStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationStatus::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationStatus::Invalid { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationStatus::Error { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ValidationStatus::Skipped { .. })
    }
}

/// Result of validating a single file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileValidationResult {
    pub path: PathBuf,
    pub status: ValidationStatus,
    /// Findings in report order; empty unless the file is invalid
    pub diagnostics: Vec<Diagnostic>,
    pub duration: Duration,
}

impl FileValidationResult {
    pub fn valid(path: PathBuf, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Valid,
            diagnostics: Vec::new(),
            duration,
        }
    }

    pub fn invalid(path: PathBuf, diagnostics: Vec<Diagnostic>, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Invalid {
                error_count: diagnostics.len(),
            },
            diagnostics,
            duration,
        }
    }

    pub fn error(path: PathBuf, error: ValidationError, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Error {
                message: error.to_string(),
            },
            diagnostics: Vec::new(),
            duration,
        }
    }

    pub fn skipped(path: PathBuf, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Skipped {
                reason: reason.into(),
            },
            diagnostics: Vec::new(),
            duration,
        }
    }

    /// Classify the outcome of one validation call
    pub fn from_outcome(
        path: PathBuf,
        outcome: Result<Vec<Diagnostic>>,
        duration: Duration,
    ) -> Self {
        match outcome {
            Ok(diagnostics) if diagnostics.is_empty() => Self::valid(path, duration),
            Ok(diagnostics) => Self::invalid(path, diagnostics, duration),
            Err(error) => Self::error(path, error, duration),
        }
    }
}

/// Progress update for validation
#[derive(Debug, Clone)]
pub struct ValidationProgress {
    /// File that just finished, during the validation phase
    pub current_file: Option<PathBuf>,
    pub completed: usize,
    pub total: usize,
    pub phase: ValidationPhase,
}

/// Phase of validation process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    Discovery,
    Validation,
    Aggregation,
    Complete,
}

/// Performance metrics for validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_duration: Duration,
    pub discovery_duration: Duration,
    pub validation_duration: Duration,
    pub average_time_per_file: Duration,
    pub throughput_files_per_second: f64,
    pub concurrent_validations: usize,
}

/// Aggregated results of validating multiple files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResults {
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub error_files: usize,
    pub skipped_files: usize,
    /// Diagnostics across all files
    pub total_diagnostics: usize,
    /// Sum of per-file durations
    pub total_duration: Duration,
    pub average_duration: Duration,
    /// Individual file results, in discovery order
    pub file_results: Vec<FileValidationResult>,
    pub performance_metrics: PerformanceMetrics,
}

impl ValidationResults {
    /// Aggregate individual file results into summary
    pub fn aggregate(file_results: Vec<FileValidationResult>) -> Self {
        let total_files = file_results.len();
        let mut valid_files = 0;
        let mut invalid_files = 0;
        let mut error_files = 0;
        let mut skipped_files = 0;
        let mut total_diagnostics = 0;
        let mut total_duration = Duration::ZERO;

        for result in &file_results {
            match result.status {
                ValidationStatus::Valid => valid_files += 1,
                ValidationStatus::Invalid { .. } => invalid_files += 1,
                ValidationStatus::Error { .. } => error_files += 1,
                ValidationStatus::Skipped { .. } => skipped_files += 1,
            }
            total_diagnostics += result.diagnostics.len();
            total_duration += result.duration;
        }

        let average_duration = average(total_duration, total_files);

        let performance_metrics = PerformanceMetrics {
            total_duration,
            discovery_duration: Duration::ZERO,
            validation_duration: total_duration,
            average_time_per_file: average_duration,
            throughput_files_per_second: throughput(total_files, total_duration),
            concurrent_validations: 1,
        };

        Self {
            total_files,
            valid_files,
            invalid_files,
            error_files,
            skipped_files,
            total_diagnostics,
            total_duration,
            average_duration,
            file_results,
            performance_metrics,
        }
    }

    /// Create results with measured performance metrics
    pub fn with_metrics(
        file_results: Vec<FileValidationResult>,
        performance_metrics: PerformanceMetrics,
    ) -> Self {
        let mut results = Self::aggregate(file_results);
        results.performance_metrics = performance_metrics;
        results
    }

    /// Check if all files validated successfully
    pub fn all_valid(&self) -> bool {
        self.valid_files == self.total_files && self.total_files > 0
    }

    /// Check if any file was invalid or could not be validated
    pub fn has_errors(&self) -> bool {
        self.error_files > 0 || self.invalid_files > 0
    }

    /// Get success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.valid_files as f64 / self.total_files as f64) * 100.0
        }
    }
}

fn average(total: Duration, count: usize) -> Duration {
    match u32::try_from(count) {
        Ok(count) if count > 0 => total / count,
        _ => Duration::ZERO,
    }
}

fn throughput(count: usize, duration: Duration) -> f64 {
    if duration.as_secs_f64() > 0.0 {
        count as f64 / duration.as_secs_f64()
    } else {
        0.0
    }
}

/// Progress callback type for validation updates
pub type ProgressCallback = Arc<dyn Fn(ValidationProgress) + Send + Sync>;

/// Validates many files against one compiled schema
pub struct ValidationEngine {
    schema: Arc<Schema>,
    options: Arc<ValidationOptions>,
    config: ValidationConfig,
}

impl ValidationEngine {
    pub fn new(schema: Arc<Schema>, options: ValidationOptions, config: ValidationConfig) -> Self {
        Self {
            schema,
            options: Arc::new(options),
            config,
        }
    }

    /// Validate the files found under `path`
    pub async fn validate_path(
        &self,
        path: &Path,
        file_discovery: &FileDiscovery,
    ) -> Result<ValidationResults> {
        self.validate_path_with_progress(path, file_discovery, None)
            .await
    }

    /// Validate the files found under `path`, reporting progress
    pub async fn validate_path_with_progress(
        &self,
        path: &Path,
        file_discovery: &FileDiscovery,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<ValidationResults> {
        let workflow_start = Instant::now();
        let mut performance_metrics = PerformanceMetrics {
            concurrent_validations: self.config.max_concurrent_validations,
            ..PerformanceMetrics::default()
        };

        let report = |completed: usize, total: usize, phase: ValidationPhase| {
            if let Some(callback) = &progress_callback {
                callback(ValidationProgress {
                    current_file: None,
                    completed,
                    total,
                    phase,
                });
            }
        };

        report(0, 0, ValidationPhase::Discovery);
        let discovery_start = Instant::now();
        let files = file_discovery.discover_files(path).await?;
        performance_metrics.discovery_duration = discovery_start.elapsed();
        info!(path = %path.display(), files = files.len(), "discovered files");

        let validation_start = Instant::now();
        let results = self
            .validate_files_with_progress(files, progress_callback.clone())
            .await?;
        performance_metrics.validation_duration = validation_start.elapsed();

        report(results.len(), results.len(), ValidationPhase::Aggregation);

        performance_metrics.total_duration = workflow_start.elapsed();
        performance_metrics.average_time_per_file =
            average(performance_metrics.validation_duration, results.len());
        performance_metrics.throughput_files_per_second =
            throughput(results.len(), performance_metrics.total_duration);

        let final_results = ValidationResults::with_metrics(results, performance_metrics);
        report(
            final_results.total_files,
            final_results.total_files,
            ValidationPhase::Complete,
        );

        Ok(final_results)
    }

    /// Validate a list of files
    pub async fn validate_files(&self, files: Vec<PathBuf>) -> Result<Vec<FileValidationResult>> {
        self.validate_files_with_progress(files, None).await
    }

    /// Validate a list of files, reporting each completed file
    ///
    /// Files start in list order. With fail-fast on, files that have not
    /// started when a file turns out invalid or erroneous are skipped.
    pub async fn validate_files_with_progress(
        &self,
        files: Vec<PathBuf>,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<Vec<FileValidationResult>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let total_files = files.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_concurrent_validations.max(1),
        ));

        let validation_tasks: Vec<_> = files
            .into_iter()
            .map(|file_path| {
                let schema = Arc::clone(&self.schema);
                let options = Arc::clone(&self.options);
                let semaphore = Arc::clone(&semaphore);
                let completed = Arc::clone(&completed);
                let failed = Arc::clone(&failed);
                let progress_callback = progress_callback.clone();
                let timeout = self.config.validation_timeout;
                let fail_fast = self.config.fail_fast;

                tokio::spawn(async move {
                    let permit = semaphore.acquire_owned().await.map_err(|_| {
                        ValidationError::Concurrency {
                            details: "Failed to acquire validation semaphore".to_string(),
                        }
                    })?;

                    let result = if fail_fast && failed.load(Ordering::SeqCst) {
                        FileValidationResult::skipped(
                            file_path.clone(),
                            FAIL_FAST_REASON,
                            Duration::ZERO,
                        )
                    } else {
                        let start = Instant::now();
                        match tokio::time::timeout(
                            timeout,
                            Self::validate_single_file_internal(file_path.clone(), schema, options),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => FileValidationResult::error(
                                file_path.clone(),
                                ValidationError::Concurrency {
                                    details: format!("Validation timeout after {:?}", timeout),
                                },
                                start.elapsed(),
                            ),
                        }
                    };

                    if result.status.is_invalid() || result.status.is_error() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    // Release only after the failure is visible to waiting files.
                    drop(permit);

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(callback) = &progress_callback {
                        callback(ValidationProgress {
                            current_file: Some(file_path),
                            completed: done,
                            total: total_files,
                            phase: ValidationPhase::Validation,
                        });
                    }

                    Ok::<FileValidationResult, ValidationError>(result)
                })
            })
            .collect();

        let task_results =
            try_join_all(validation_tasks)
                .await
                .map_err(|e| ValidationError::Concurrency {
                    details: format!("Task join error: {}", e),
                })?;

        task_results.into_iter().collect()
    }

    async fn validate_single_file_internal(
        file_path: PathBuf,
        schema: Arc<Schema>,
        options: Arc<ValidationOptions>,
    ) -> FileValidationResult {
        let start_time = Instant::now();

        let data = match tokio::fs::read(&file_path).await {
            Ok(data) => data,
            Err(e) => return FileValidationResult::error(file_path, e.into(), start_time.elapsed()),
        };

        let base_url = file_path.to_string_lossy().into_owned();
        let outcome = tokio::task::spawn_blocking(move || {
            schema.validate_source(&data, Some(&base_url), &options)
        })
        .await
        .unwrap_or_else(|e| {
            Err(ValidationError::Concurrency {
                details: format!("Join error: {}", e),
            })
        });

        let result = FileValidationResult::from_outcome(file_path, outcome, start_time.elapsed());
        debug!(
            path = %result.path.display(),
            status = ?result.status,
            duration_ms = result.duration.as_millis() as u64,
            "validated file"
        );
        result
    }

    /// Validate one file
    pub async fn validate_single_file(&self, file_path: &Path) -> FileValidationResult {
        Self::validate_single_file_internal(
            file_path.to_path_buf(),
            Arc::clone(&self.schema),
            Arc::clone(&self.options),
        )
        .await
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }
}
