//! Error taxonomy for backup runs
//!
//! Every failure the orchestrator can observe is classified here so the retry
//! state machine can decide retryability from the error kind instead of
//! string-matching messages.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("dump timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("dump process exited with code {code:?}: {stderr}")]
    DumpProcess { code: Option<i32>, stderr: String },

    #[error("dump exited successfully but produced no output")]
    EmptyOutput,

    #[error("failed to write archive: {0}")]
    ArchiveWrite(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Coarse classification of a [`BackupError`], used by the retry loop and in
/// tests. The variants mirror the error taxonomy one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    DumpProcess,
    EmptyOutput,
    ArchiveWrite,
    Configuration,
    Delivery,
}

impl ErrorKind {
    /// Whether another dump attempt is worth making for this kind of failure.
    ///
    /// Archive failures re-dump rather than re-archive: a full disk may have
    /// corrupted the source dump as well.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::DumpProcess
                | ErrorKind::EmptyOutput
                | ErrorKind::ArchiveWrite
        )
    }
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::Timeout { .. } => ErrorKind::Timeout,
            BackupError::DumpProcess { .. } => ErrorKind::DumpProcess,
            BackupError::EmptyOutput => ErrorKind::EmptyOutput,
            BackupError::ArchiveWrite(_) => ErrorKind::ArchiveWrite,
            BackupError::Configuration(_) => ErrorKind::Configuration,
            BackupError::Delivery(_) => ErrorKind::Delivery,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_failures_are_retryable() {
        assert!(BackupError::Timeout {
            timeout: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(BackupError::DumpProcess {
            code: Some(1),
            stderr: "connection refused".to_string()
        }
        .is_retryable());
        assert!(BackupError::EmptyOutput.is_retryable());
        assert!(BackupError::ArchiveWrite("disk full".to_string()).is_retryable());
    }

    #[test]
    fn test_configuration_and_delivery_are_not_retryable() {
        assert!(!BackupError::Configuration("missing host".to_string()).is_retryable());
        assert!(!BackupError::Delivery("webhook 500".to_string()).is_retryable());
    }

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(BackupError::EmptyOutput.kind(), ErrorKind::EmptyOutput);
        assert_eq!(
            BackupError::Timeout {
                timeout: Duration::from_secs(5)
            }
            .kind(),
            ErrorKind::Timeout
        );
    }
}
