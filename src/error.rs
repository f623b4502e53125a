use thiserror::Error;

/// Failure taxonomy of the sentinel pipeline.
///
/// Only `SourceUnavailable` at startup terminates a run. Every other variant
/// is recovered where it happens and only surfaces in logs, except
/// `ExportFailure`, which is returned to whoever asked for the export.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("frame source unavailable ({source_name}): {reason}")]
    SourceUnavailable { source_name: String, reason: String },
    #[error("{stage} adapter failed: {message}")]
    AdapterFailure {
        stage: &'static str,
        message: String,
    },
    #[error("actuator command '{command}' failed: {message}")]
    ActuatorFailure { command: String, message: String },
    #[error("export failed: {message}")]
    ExportFailure { message: String },
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl SentinelError {
    pub fn source_unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn adapter(stage: &'static str, message: impl ToString) -> Self {
        Self::AdapterFailure {
            stage,
            message: message.to_string(),
        }
    }

    pub fn export(message: impl ToString) -> Self {
        Self::ExportFailure {
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
