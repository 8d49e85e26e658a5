// End-to-end orchestrator runs against scripted stand-in dump binaries
#![cfg(unix)]

use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use dump_manager::{
    BackupOrchestrator, ErrorKind, RealDumpRunner, RunStatus, TargetStatus,
};
use flate2::read::GzDecoder;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Write an executable shell script standing in for pg_dump/mysqldump.
fn fake_dump(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn load_test_config(dir: &TempDir, targets_toml: &str) -> dump_manager::Config {
    let body = format!(
        r#"
[global]
destination_root = "{root}"
scratch_dir = "{scratch}"
timeout_seconds = 1
max_attempts = 2
backoff = "fixed"
backoff_initial_seconds = 0
max_parallel_targets = 2

{targets}
"#,
        root = dir.path().join("backups").display(),
        scratch = dir.path().join("scratch").display(),
        targets = targets_toml,
    );
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, body).unwrap();
    dump_manager::load_config(&config_path).unwrap()
}

fn artifacts_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    paths
}

#[tokio::test]
async fn test_successful_run_writes_compressed_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let dump = fake_dump(temp_dir.path(), "fake_pg_dump", "echo '-- PostgreSQL dump'");

    let config = load_test_config(
        &temp_dir,
        &format!(
            r#"
[targets.shop]
engine = "postgres"
host = "localhost"
username = "backup"
database = "shop"
dump_binary = "{}"
"#,
            dump.display()
        ),
    );

    let orchestrator = BackupOrchestrator::new(&config, RealDumpRunner::new());
    let result = orchestrator.run(CancellationToken::new()).await;

    assert_eq!(result.status, RunStatus::Success);
    assert!(!result.has_failures());
    assert_eq!(result.outcomes.len(), 1);
    let outcome = &result.outcomes[0];
    assert_eq!(outcome.status, TargetStatus::Succeeded);
    assert_eq!(outcome.attempts, 1);

    let artifact = outcome.artifact.as_ref().unwrap();
    assert!(artifact.path.exists());
    assert!(artifact.path.to_string_lossy().ends_with(".sql.gz"));
    assert!(artifact.size_bytes > 0);

    let mut decoder = GzDecoder::new(fs::File::open(&artifact.path).unwrap());
    let mut contents = String::new();
    decoder.read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "-- PostgreSQL dump\n");
}

#[tokio::test]
async fn test_empty_dump_output_fails_after_all_attempts() {
    let temp_dir = TempDir::new().unwrap();
    let dump = fake_dump(temp_dir.path(), "fake_pg_dump", "exit 0");

    let config = load_test_config(
        &temp_dir,
        &format!(
            r#"
[targets.shop]
engine = "postgres"
host = "localhost"
username = "backup"
database = "shop"
dump_binary = "{}"
"#,
            dump.display()
        ),
    );

    let orchestrator = BackupOrchestrator::new(&config, RealDumpRunner::new());
    let result = orchestrator.run(CancellationToken::new()).await;

    assert_eq!(result.status, RunStatus::TotalFailure);
    let outcome = &result.outcomes[0];
    assert_eq!(outcome.status, TargetStatus::Failed);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(
        outcome.error.as_ref().unwrap().kind(),
        ErrorKind::EmptyOutput
    );
    assert!(
        artifacts_in(&temp_dir.path().join("backups/shop")).is_empty(),
        "no artifact may be written for an empty dump"
    );
}

#[tokio::test]
async fn test_dump_failure_captures_stderr() {
    let temp_dir = TempDir::new().unwrap();
    let dump = fake_dump(
        temp_dir.path(),
        "fake_pg_dump",
        "echo 'pg_dump: connection refused' >&2; exit 2",
    );

    let config = load_test_config(
        &temp_dir,
        &format!(
            r#"
[targets.shop]
engine = "postgres"
host = "localhost"
username = "backup"
database = "shop"
dump_binary = "{}"
"#,
            dump.display()
        ),
    );

    let orchestrator = BackupOrchestrator::new(&config, RealDumpRunner::new());
    let result = orchestrator.run(CancellationToken::new()).await;

    let outcome = &result.outcomes[0];
    assert_eq!(outcome.status, TargetStatus::Failed);
    let error = outcome.error.as_ref().unwrap();
    assert_eq!(error.kind(), ErrorKind::DumpProcess);
    assert!(error.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_hung_dump_times_out() {
    let temp_dir = TempDir::new().unwrap();
    let dump = fake_dump(temp_dir.path(), "fake_pg_dump", "sleep 30");

    let config = load_test_config(
        &temp_dir,
        &format!(
            r#"
[targets.shop]
engine = "postgres"
host = "localhost"
username = "backup"
database = "shop"
max_attempts = 1
dump_binary = "{}"
"#,
            dump.display()
        ),
    );

    let orchestrator = BackupOrchestrator::new(&config, RealDumpRunner::new());
    let result = orchestrator.run(CancellationToken::new()).await;

    let outcome = &result.outcomes[0];
    assert_eq!(outcome.status, TargetStatus::Failed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.error.as_ref().unwrap().kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_mixed_run_reports_partial_failure() {
    let temp_dir = TempDir::new().unwrap();
    let good = fake_dump(temp_dir.path(), "good_dump", "echo 'data'");
    let bad = fake_dump(temp_dir.path(), "bad_dump", "exit 1");

    let config = load_test_config(
        &temp_dir,
        &format!(
            r#"
[targets.alpha]
engine = "postgres"
host = "localhost"
username = "backup"
database = "alpha"
dump_binary = "{good}"

[targets.beta]
engine = "mysql"
host = "localhost"
username = "backup"
database = "beta"
dump_binary = "{bad}"
"#,
            good = good.display(),
            bad = bad.display(),
        ),
    );

    let orchestrator = BackupOrchestrator::new(&config, RealDumpRunner::new());
    let result = orchestrator.run(CancellationToken::new()).await;

    assert_eq!(result.status, RunStatus::PartialFailure);
    assert!(result.has_failures());
    assert_eq!(result.outcomes[0].target, "alpha");
    assert_eq!(result.outcomes[0].status, TargetStatus::Succeeded);
    assert_eq!(result.outcomes[1].target, "beta");
    assert_eq!(result.outcomes[1].status, TargetStatus::Failed);
}

#[tokio::test]
async fn test_scratch_directory_left_empty_after_run() {
    let temp_dir = TempDir::new().unwrap();
    let dump = fake_dump(temp_dir.path(), "fake_pg_dump", "echo 'data'");

    let config = load_test_config(
        &temp_dir,
        &format!(
            r#"
[targets.shop]
engine = "postgres"
host = "localhost"
username = "backup"
database = "shop"
dump_binary = "{}"
"#,
            dump.display()
        ),
    );

    let orchestrator = BackupOrchestrator::new(&config, RealDumpRunner::new());
    let result = orchestrator.run(CancellationToken::new()).await;
    assert_eq!(result.status, RunStatus::Success);

    let scratch = temp_dir.path().join("scratch");
    assert!(artifacts_in(&scratch).is_empty());
}

#[tokio::test]
async fn test_consecutive_runs_accumulate_artifacts() {
    let temp_dir = TempDir::new().unwrap();
    let dump = fake_dump(temp_dir.path(), "fake_pg_dump", "echo 'data'");

    let config = load_test_config(
        &temp_dir,
        &format!(
            r#"
[targets.shop]
engine = "postgres"
host = "localhost"
username = "backup"
database = "shop"
dump_binary = "{}"
"#,
            dump.display()
        ),
    );

    let orchestrator = BackupOrchestrator::new(&config, RealDumpRunner::new());
    for _ in 0..3 {
        let result = orchestrator.run(CancellationToken::new()).await;
        assert_eq!(result.status, RunStatus::Success);
    }

    assert_eq!(artifacts_in(&temp_dir.path().join("backups/shop")).len(), 3);
}
