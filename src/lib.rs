//! dump-manager library
//!
//! Unattended, periodic logical backups of relational databases: dump,
//! package, retain, retry, notify.

pub mod config;
pub mod errors;
pub mod managers;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, resolve_all_targets, BackupTarget, Config};
pub use errors::{BackupError, ErrorKind};
pub use managers::backup::{BackupOrchestrator, RunResult, RunStatus, TargetOutcome, TargetStatus};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::notification::Notifier;
pub use utils::{Artifact, DumpAttempt, DumpRunner, RealDumpRunner, RunLock};
