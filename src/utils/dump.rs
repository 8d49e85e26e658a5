//! Dump execution: one invocation of the external dump utility per attempt
//!
//! The subprocess writes its dump to stdout, which is redirected straight into
//! the attempt's output file. Stderr is captured separately (bounded) so a
//! failed attempt carries usable diagnostics without unbounded growth.
//! A failed attempt never leaves a partial file behind.

use crate::config::BackupTarget;
use crate::errors::BackupError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured stderr is truncated to this many bytes
const MAX_STDERR_BYTES: usize = 4096;

/// One finalized execution of the dump utility. Never mutated after the
/// subprocess exits or is killed.
#[derive(Debug)]
pub struct DumpAttempt {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub bytes_written: u64,
    pub error: Option<BackupError>,
}

impl DumpAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    fn failed(started_at: DateTime<Utc>, exit_code: Option<i32>, error: BackupError) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            exit_code,
            bytes_written: 0,
            error: Some(error),
        }
    }
}

/// Abstraction over dump execution, enabling mocking in orchestrator tests
#[async_trait]
pub trait DumpRunner: Send + Sync {
    /// Run one dump attempt for `target`, writing the dump to `output_path`.
    ///
    /// Contract: on success exactly one non-empty file exists at
    /// `output_path`; on failure no file is left there.
    async fn run_dump(
        &self,
        target: &BackupTarget,
        output_path: &Path,
        timeout: Duration,
    ) -> DumpAttempt;
}

/// Default implementation invoking the real dump utility
#[derive(Debug, Clone, Default)]
pub struct RealDumpRunner;

impl RealDumpRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DumpRunner for RealDumpRunner {
    async fn run_dump(
        &self,
        target: &BackupTarget,
        output_path: &Path,
        timeout: Duration,
    ) -> DumpAttempt {
        let started_at = Utc::now();

        let program = match resolve_dump_binary(target) {
            Ok(p) => p,
            Err(e) => return DumpAttempt::failed(started_at, None, e),
        };
        let password = match resolve_password(target) {
            Ok(p) => p,
            Err(e) => return DumpAttempt::failed(started_at, None, e),
        };

        let output_file = match std::fs::File::create(output_path) {
            Ok(f) => f,
            Err(e) => {
                return DumpAttempt::failed(
                    started_at,
                    None,
                    BackupError::DumpProcess {
                        code: None,
                        stderr: format!("failed to create output file: {}", e),
                    },
                )
            }
        };

        let mut cmd = Command::new(&program);
        cmd.args(dump_args(target).iter().map(String::as_str));
        // Credentials go through the environment only, never argv
        if let Some(password) = password {
            cmd.env(target.engine.password_env_var(), password);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(output_file));
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(
            "Running {} {}",
            program.display(),
            dump_args(target).join(" ")
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                remove_partial(output_path);
                return DumpAttempt::failed(
                    started_at,
                    None,
                    BackupError::DumpProcess {
                        code: None,
                        stderr: format!("failed to spawn {}: {}", program.display(), e),
                    },
                );
            }
        };

        let stderr_task = tokio::spawn(read_stderr_bounded(child.stderr.take()));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                remove_partial(output_path);
                return DumpAttempt::failed(
                    started_at,
                    None,
                    BackupError::DumpProcess {
                        code: None,
                        stderr: format!("failed to wait for dump process: {}", e),
                    },
                );
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed-out dump process: {}", e);
                }
                remove_partial(output_path);
                return DumpAttempt::failed(started_at, None, BackupError::Timeout { timeout });
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            remove_partial(output_path);
            return DumpAttempt::failed(
                started_at,
                status.code(),
                BackupError::DumpProcess {
                    code: status.code(),
                    stderr,
                },
            );
        }

        // Exit 0 with nothing written means the credentials or connectivity
        // silently failed; never promote that to an artifact.
        let bytes_written = std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0);
        if bytes_written == 0 {
            remove_partial(output_path);
            return DumpAttempt::failed(started_at, status.code(), BackupError::EmptyOutput);
        }

        DumpAttempt {
            started_at,
            finished_at: Utc::now(),
            exit_code: status.code(),
            bytes_written,
            error: None,
        }
    }
}

/// Command-line arguments for the target's dump utility
pub fn dump_args(target: &BackupTarget) -> Vec<String> {
    match target.engine {
        crate::config::Engine::Postgres => vec![
            "--host".to_string(),
            target.host.clone(),
            "--port".to_string(),
            target.port.to_string(),
            "--username".to_string(),
            target.username.clone(),
            "--no-password".to_string(),
            "--dbname".to_string(),
            target.database.clone(),
        ],
        crate::config::Engine::Mysql => vec![
            "--host".to_string(),
            target.host.clone(),
            "--port".to_string(),
            target.port.to_string(),
            "--user".to_string(),
            target.username.clone(),
            "--single-transaction".to_string(),
            "--no-tablespaces".to_string(),
            target.database.clone(),
        ],
    }
}

fn resolve_dump_binary(target: &BackupTarget) -> Result<PathBuf, BackupError> {
    if let Some(ref binary) = target.dump_binary {
        return Ok(binary.clone());
    }
    which::which(target.engine.dump_program()).map_err(|_| {
        BackupError::Configuration(format!(
            "{} not found in PATH (target '{}')",
            target.engine.dump_program(),
            target.name
        ))
    })
}

fn resolve_password(target: &BackupTarget) -> Result<Option<String>, BackupError> {
    if let Some(ref var) = target.password_env {
        return std::env::var(var).map(Some).map_err(|_| {
            BackupError::Configuration(format!(
                "password env var '{}' not set (target '{}')",
                var, target.name
            ))
        });
    }
    if let Some(ref file) = target.password_file {
        return std::fs::read_to_string(file)
            .map(|s| Some(s.trim_end().to_string()))
            .map_err(|e| {
                BackupError::Configuration(format!(
                    "failed to read password file {} (target '{}'): {}",
                    file.display(),
                    target.name,
                    e
                ))
            });
    }
    Ok(None)
}

/// Read stderr to EOF, keeping at most [`MAX_STDERR_BYTES`]. Draining past
/// the bound keeps the child from blocking on a full pipe.
async fn read_stderr_bounded(stderr: Option<tokio::process::ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };
    let mut kept = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if kept.len() < MAX_STDERR_BYTES {
                    let take = n.min(MAX_STDERR_BYTES - kept.len());
                    kept.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }
    String::from_utf8_lossy(&kept).trim().to_string()
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove partial dump file {}: {}", path.display(), e);
        }
    }
}

/// A mock runner for orchestrator tests: scripted per-target responses,
/// recorded invocation counts. Honors the same filesystem contract as the
/// real runner.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum MockDump {
        /// Exit 0 and write `bytes` to the output file
        Success { bytes: Vec<u8> },
        /// Exit nonzero with captured stderr
        Fail { code: i32, stderr: String },
        /// Exit 0 without producing output
        Empty,
        /// Never exit within the attempt timeout
        TimedOut,
    }

    #[derive(Default)]
    pub struct MockDumpRunner {
        /// Scripted responses per target, consumed front to back
        responses: Mutex<HashMap<String, Vec<MockDump>>>,
        calls: Mutex<HashMap<String, u32>>,
    }

    impl MockDumpRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Append a scripted response for a target
        pub fn script(self, target: &str, response: MockDump) -> Self {
            self.responses
                .lock()
                .unwrap()
                .entry(target.to_string())
                .or_default()
                .push(response);
            self
        }

        pub fn call_count(&self, target: &str) -> u32 {
            self.calls.lock().unwrap().get(target).copied().unwrap_or(0)
        }

        fn next_response(&self, target: &str) -> MockDump {
            let mut responses = self.responses.lock().unwrap();
            match responses.get_mut(target) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => MockDump::Success {
                    bytes: b"-- mock dump\n".to_vec(),
                },
            }
        }
    }

    #[async_trait]
    impl DumpRunner for MockDumpRunner {
        async fn run_dump(
            &self,
            target: &BackupTarget,
            output_path: &Path,
            timeout: Duration,
        ) -> DumpAttempt {
            let started_at = Utc::now();
            *self
                .calls
                .lock()
                .unwrap()
                .entry(target.name.clone())
                .or_insert(0) += 1;

            match self.next_response(&target.name) {
                MockDump::Success { bytes } => {
                    std::fs::write(output_path, &bytes).expect("mock dump write");
                    DumpAttempt {
                        started_at,
                        finished_at: Utc::now(),
                        exit_code: Some(0),
                        bytes_written: bytes.len() as u64,
                        error: None,
                    }
                }
                MockDump::Fail { code, stderr } => DumpAttempt::failed(
                    started_at,
                    Some(code),
                    BackupError::DumpProcess {
                        code: Some(code),
                        stderr,
                    },
                ),
                MockDump::Empty => {
                    DumpAttempt::failed(started_at, Some(0), BackupError::EmptyOutput)
                }
                MockDump::TimedOut => {
                    DumpAttempt::failed(started_at, None, BackupError::Timeout { timeout })
                }
            }
        }
    }
}
