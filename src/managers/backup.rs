//! Backup orchestrator: drives each target through its retry state machine
//!
//! Per target the flow is dump -> archive -> retention, strictly in that
//! order. A failed attempt is classified by error kind; retryable failures
//! re-enter the dump state after a backoff delay until the attempt budget is
//! exhausted. Targets are independent: one target's final failure never
//! aborts the others. Exactly one [`RunResult`] comes out of a run.

use crate::config::{backoff_delay, resolve_all_targets, BackupTarget, Config, GlobalConfig};
use crate::errors::BackupError;
use crate::utils::archive::{self, Artifact};
use crate::utils::dump::DumpRunner;
use crate::utils::retention;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Terminal state of one target within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// One target's final result for a run
#[derive(Debug)]
pub struct TargetOutcome {
    pub target: String,
    pub status: TargetStatus,
    pub attempts: u32,
    pub artifact: Option<Artifact>,
    pub error: Option<BackupError>,
    pub duration: Duration,
}

impl TargetOutcome {
    fn skipped(target: &str, attempts: u32) -> Self {
        Self {
            target: target.to_string(),
            status: TargetStatus::Skipped,
            attempts,
            artifact: None,
            error: None,
            duration: Duration::ZERO,
        }
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    PartialFailure,
    TotalFailure,
    Interrupted,
}

/// The full run: every target's outcome plus the aggregate verdict
#[derive(Debug)]
pub struct RunResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub outcomes: Vec<TargetOutcome>,
}

impl RunResult {
    fn assemble(
        started_at: DateTime<Utc>,
        mut outcomes: Vec<TargetOutcome>,
        interrupted: bool,
    ) -> Self {
        // Deterministic report order regardless of worker completion order
        outcomes.sort_by(|a, b| a.target.cmp(&b.target));

        let failed = outcomes
            .iter()
            .filter(|o| o.status == TargetStatus::Failed)
            .count();
        let succeeded = outcomes
            .iter()
            .filter(|o| o.status == TargetStatus::Succeeded)
            .count();

        let status = if interrupted {
            RunStatus::Interrupted
        } else if failed == 0 {
            RunStatus::Success
        } else if succeeded == 0 {
            RunStatus::TotalFailure
        } else {
            RunStatus::PartialFailure
        };

        Self {
            started_at,
            finished_at: Utc::now(),
            status,
            outcomes,
        }
    }

    /// Whether the process should exit non-zero for this run
    pub fn has_failures(&self) -> bool {
        self.status != RunStatus::Success
    }
}

pub struct BackupOrchestrator<R: DumpRunner + 'static> {
    global: Arc<GlobalConfig>,
    targets: Vec<BackupTarget>,
    runner: Arc<R>,
    scratch_dir: PathBuf,
}

impl<R: DumpRunner + 'static> BackupOrchestrator<R> {
    pub fn new(config: &Config, runner: R) -> Self {
        let scratch_dir = config
            .global
            .scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("dump-manager"));

        Self {
            global: Arc::new(config.global.clone()),
            targets: resolve_all_targets(config),
            runner: Arc::new(runner),
            scratch_dir,
        }
    }

    /// Restrict the run to a single named target.
    pub fn with_target_filter(mut self, name: &str) -> anyhow::Result<Self> {
        let filtered: Vec<BackupTarget> = self
            .targets
            .into_iter()
            .filter(|t| t.name == name)
            .collect();
        if filtered.is_empty() {
            anyhow::bail!("Target not found: {}", name);
        }
        self.targets = filtered;
        Ok(self)
    }

    /// Execute one run over all configured targets.
    ///
    /// Cancelling `cancel` kills in-flight dump subprocesses, cleans partial
    /// files, and marks the run `Interrupted` with the outcomes gathered so
    /// far. The result is produced either way.
    pub async fn run(&self, cancel: CancellationToken) -> RunResult {
        let started_at = Utc::now();

        if let Err(e) = std::fs::create_dir_all(&self.scratch_dir) {
            error!(
                "Failed to create scratch directory {}: {}",
                self.scratch_dir.display(),
                e
            );
            let outcomes = self
                .targets
                .iter()
                .map(|t| TargetOutcome {
                    target: t.name.clone(),
                    status: TargetStatus::Failed,
                    attempts: 0,
                    artifact: None,
                    error: Some(BackupError::Configuration(format!(
                        "scratch directory unavailable: {}",
                        e
                    ))),
                    duration: Duration::ZERO,
                })
                .collect();
            return RunResult::assemble(started_at, outcomes, false);
        }

        info!(
            "Starting backup run for {} target(s), {} worker(s)",
            self.targets.len(),
            self.global.max_parallel_targets
        );

        let semaphore = Arc::new(Semaphore::new(self.global.max_parallel_targets));
        let mut handles = Vec::with_capacity(self.targets.len());

        for target in self.targets.clone() {
            let runner = Arc::clone(&self.runner);
            let global = Arc::clone(&self.global);
            let semaphore = Arc::clone(&semaphore);
            let scratch_dir = self.scratch_dir.clone();
            let cancel = cancel.clone();
            let name = target.name.clone();

            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TargetOutcome::skipped(&target.name, 0),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return TargetOutcome::skipped(&target.name, 0),
                    },
                };
                run_target(runner.as_ref(), &global, &target, &scratch_dir, &cancel).await
            });
            handles.push((name, handle));
        }

        // Join barrier: every target reaches a terminal state before the run
        // result exists
        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("Worker for target '{}' aborted: {}", name, e);
                    outcomes.push(TargetOutcome {
                        target: name,
                        status: TargetStatus::Failed,
                        attempts: 0,
                        artifact: None,
                        error: Some(BackupError::Configuration(format!(
                            "backup worker aborted: {}",
                            e
                        ))),
                        duration: Duration::ZERO,
                    });
                }
            }
        }

        self.cleanup_scratch();

        let result = RunResult::assemble(started_at, outcomes, cancel.is_cancelled());
        info!(
            "Backup run finished: {:?} ({} target(s))",
            result.status,
            result.outcomes.len()
        );
        result
    }

    /// Remove leftover dump files; artifacts are not stored here
    fn cleanup_scratch(&self) {
        let Ok(entries) = std::fs::read_dir(&self.scratch_dir) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(
                    "Failed to remove scratch file {}: {}",
                    entry.path().display(),
                    e
                );
            }
        }
    }
}

/// Drive one target to a terminal state:
/// `Pending -> Running -> {Succeeded | Retrying -> Running | FailedFinal}`
async fn run_target<R: DumpRunner>(
    runner: &R,
    global: &GlobalConfig,
    target: &BackupTarget,
    scratch_dir: &std::path::Path,
    cancel: &CancellationToken,
) -> TargetOutcome {
    if !target.enabled {
        info!("Target '{}' is disabled, skipping", target.name);
        return TargetOutcome::skipped(&target.name, 0);
    }

    let started = std::time::Instant::now();
    let dump_path = scratch_dir.join(format!("{}.sql", target.name));
    let timeout = Duration::from_secs(target.timeout_seconds);
    let mut attempts = 0u32;

    let (status, artifact, last_error) = loop {
        attempts += 1;
        info!(
            "Target '{}': attempt {}/{}",
            target.name, attempts, target.max_attempts
        );

        // Dropping the in-flight future on cancellation kills the subprocess
        // (kill_on_drop); the partial file is removed below.
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = std::fs::remove_file(&dump_path);
                info!("Target '{}': cancelled mid-dump", target.name);
                return TargetOutcome::skipped(&target.name, attempts);
            }
            attempt = runner.run_dump(target, &dump_path, timeout) => attempt,
        };

        let failure = match attempt.error {
            None => {
                info!(
                    "Target '{}': dump complete ({} bytes)",
                    target.name, attempt.bytes_written
                );
                match archive_and_retain(target, &dump_path).await {
                    Ok(artifact) => break (TargetStatus::Succeeded, Some(artifact), None),
                    Err(e) => e,
                }
            }
            Some(e) => e,
        };

        warn!(
            "Target '{}': attempt {} failed: {}",
            target.name, attempts, failure
        );

        if !failure.is_retryable() {
            // Non-retryable failures skip the remaining budget
            break (TargetStatus::Failed, None, Some(failure));
        }
        if attempts >= target.max_attempts {
            break (TargetStatus::Failed, None, Some(failure));
        }

        let delay = backoff_delay(global, attempts);
        info!(
            "Target '{}': retrying in {:?} ({} attempt(s) left)",
            target.name,
            delay,
            target.max_attempts - attempts
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return TargetOutcome::skipped(&target.name, attempts);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    };

    // The scratch dump is consumed by the archive step; drop whatever is left
    let _ = std::fs::remove_file(&dump_path);

    match status {
        TargetStatus::Succeeded => info!(
            "Target '{}': succeeded after {} attempt(s)",
            target.name, attempts
        ),
        _ => error!(
            "Target '{}': failed after {} attempt(s): {}",
            target.name,
            attempts,
            last_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
        ),
    }

    TargetOutcome {
        target: target.name.clone(),
        status,
        attempts,
        artifact,
        error: last_error,
        duration: started.elapsed(),
    }
}

/// Archive the completed dump, then enforce retention for this target only.
/// Archive failures bubble up as retryable (the retry re-dumps, since the
/// source dump may be corrupted too).
async fn archive_and_retain(
    target: &BackupTarget,
    dump_path: &std::path::Path,
) -> Result<Artifact, BackupError> {
    let dump_path = dump_path.to_path_buf();
    let name = target.name.clone();
    let dest_dir = target.dest_dir.clone();

    // Compression is CPU-bound; keep it off the async workers
    let artifact = tokio::task::spawn_blocking(move || {
        archive::archive(&dump_path, &name, &dest_dir, Utc::now())
    })
    .await
    .map_err(|e| BackupError::ArchiveWrite(format!("archive task aborted: {}", e)))??;

    // Retention runs only after this target's own artifact is in place
    let deleted = retention::enforce(
        &target.name,
        &target.dest_dir,
        &target.retention,
        Some(&artifact.path),
    );
    if !deleted.is_empty() {
        info!(
            "Target '{}': retention deleted {} artifact(s)",
            target.name,
            deleted.len()
        );
    }

    Ok(artifact)
}
