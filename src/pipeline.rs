use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;
use thiserror::Error;

use crate::convert::{
    ConversionReport, ConvertOptions, convert_vrm_to_pmx_with_observer, taxonomy::TuningTables,
};
use crate::error::ConvertError;
use crate::logging::{ConversionLog, LogEntry};
use crate::{log_error, log_info};

/// Conversion stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Read,
    Skeleton,
    Weights,
    Mesh,
    Physics,
    Write,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Read,
        Stage::Skeleton,
        Stage::Weights,
        Stage::Mesh,
        Stage::Physics,
        Stage::Write,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Read => "read",
            Stage::Skeleton => "skeleton",
            Stage::Weights => "weights",
            Stage::Mesh => "mesh",
            Stage::Physics => "physics",
            Stage::Write => "write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag shared between the caller and the pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), ConvertError> {
        if self.is_cancelled() {
            Err(ConvertError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A fatal conversion error with the stage and file it happened on.
#[derive(Error, Debug)]
#[error("{stage} stage failed for {}: {source}", path.display())]
pub struct StageError {
    pub stage: Stage,
    pub path: PathBuf,
    #[source]
    pub source: ConvertError,
}

impl StageError {
    pub fn new(stage: Stage, path: &Path, source: ConvertError) -> Self {
        Self {
            stage,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

/// Attach stage context to a core result.
pub(crate) trait StageResultExt<T> {
    fn in_stage(self, stage: Stage, path: &Path) -> Result<T, StageError>;
}

impl<T> StageResultExt<T> for Result<T, ConvertError> {
    fn in_stage(self, stage: Stage, path: &Path) -> Result<T, StageError> {
        self.map_err(|source| StageError::new(stage, path, source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConversionStatus {
    Succeeded,
    Cancelled,
    Failed,
}

/// Caller-facing result of one conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    pub status: ConversionStatus,
    pub report: Option<ConversionReport>,
    /// Stage, path and cause of a fatal error.
    pub failure: Option<String>,
    pub log: Vec<LogEntry>,
}

impl ConversionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ConversionStatus::Succeeded
    }
}

/// Run a conversion and fold every result into a [`ConversionOutcome`].
///
/// Cancellation is reported at info level and never as a failure.
pub fn run_conversion(
    input: &Path,
    output: &Path,
    options: &ConvertOptions,
    tables: &TuningTables,
    cancel: &CancelToken,
    observer: &mut dyn FnMut(Stage),
) -> ConversionOutcome {
    let log = ConversionLog::new();
    log_info!(log, "converting {} -> {}", input.display(), output.display());

    let result = convert_vrm_to_pmx_with_observer(input, output, options, tables, cancel, &log, observer);
    match result {
        Ok(report) => {
            log_info!(
                log,
                "wrote {} ({} bytes, {} issues)",
                report.output_path.display(),
                report.bytes_written,
                report.issues.len()
            );
            ConversionOutcome {
                status: ConversionStatus::Succeeded,
                report: Some(report),
                failure: None,
                log: log.entries(),
            }
        }
        Err(error) if error.is_cancelled() => {
            log_info!(log, "conversion cancelled during {} stage", error.stage);
            ConversionOutcome {
                status: ConversionStatus::Cancelled,
                report: None,
                failure: None,
                log: log.entries(),
            }
        }
        Err(error) => {
            log_error!(log, "{error}");
            ConversionOutcome {
                status: ConversionStatus::Failed,
                report: None,
                failure: Some(error.to_string()),
                log: log.entries(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;

    #[test]
    fn given_fresh_token_when_cancelled_then_check_reports_cancellation() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(token.check().is_ok());

        shared.cancel();

        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(ConvertError::Cancelled)));
    }

    #[test]
    fn given_stage_error_when_formatted_then_stage_and_path_are_named() {
        let error = StageError::new(
            Stage::Skeleton,
            Path::new("models/avatar.vrm"),
            ConvertError::CyclicBone("頭".to_string()),
        );

        let message = error.to_string();
        assert!(message.contains("skeleton"));
        assert!(message.contains("models/avatar.vrm"));
        assert!(message.contains("頭"));
        assert!(!error.is_cancelled());
    }

    #[test]
    fn given_missing_input_when_running_then_outcome_fails_in_read_stage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("missing.vrm");
        let output = dir.path().join("out").join("missing.pmx");

        let outcome = run_conversion(
            &input,
            &output,
            &ConvertOptions::default(),
            &TuningTables::default(),
            &CancelToken::new(),
            &mut |_| {},
        );

        assert_eq!(outcome.status, ConversionStatus::Failed);
        assert!(!outcome.is_success());
        assert!(outcome.failure.as_deref().is_some_and(|failure| failure.contains("read")));
        assert!(outcome.log.iter().any(|entry| entry.level == LogLevel::Error));
        assert!(!output.exists());
    }

    #[test]
    fn given_pre_cancelled_token_when_running_then_outcome_is_cancelled_not_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("avatar.vrm");
        let output = dir.path().join("avatar.pmx");
        std::fs::write(&input, crate::convert::test_fixtures::minimal_vrm()).expect("write input");
        let token = CancelToken::new();
        token.cancel();

        let outcome = run_conversion(
            &input,
            &output,
            &ConvertOptions::default(),
            &TuningTables::default(),
            &token,
            &mut |_| {},
        );

        assert_eq!(outcome.status, ConversionStatus::Cancelled);
        assert!(outcome.failure.is_none());
        assert!(outcome.log.iter().all(|entry| entry.level != LogLevel::Error));
        assert!(!output.exists());
    }
}
