//! Artifact packaging: gzip the dump and move it into place atomically
//!
//! Archives are written under a temporary name in the destination directory
//! and renamed into place, so a reader of that directory never observes a
//! half-written artifact. The source dump file is left untouched on failure.

use crate::errors::BackupError;
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Timestamp layout used in artifact names. Millisecond resolution keeps
/// names unique across sub-second repeated runs; lexicographic order equals
/// chronological order.
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3f";

const ARTIFACT_SUFFIX: &str = ".sql.gz";

/// A packaged, retained backup file
#[derive(Debug, Clone)]
pub struct Artifact {
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Compress `dump_path` into `dest_dir` as `<target>_<timestamp>.sql.gz`.
pub fn archive(
    dump_path: &Path,
    target_name: &str,
    dest_dir: &Path,
    timestamp: DateTime<Utc>,
) -> Result<Artifact, BackupError> {
    std::fs::create_dir_all(dest_dir).map_err(|e| {
        BackupError::ArchiveWrite(format!(
            "failed to create destination directory {}: {}",
            dest_dir.display(),
            e
        ))
    })?;

    let final_path = unique_artifact_path(dest_dir, target_name, timestamp);
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dest_dir.join(format!(".{}.tmp", file_name));

    debug!(
        "Archiving {} -> {}",
        dump_path.display(),
        final_path.display()
    );

    if let Err(e) = compress_into(dump_path, &tmp_path) {
        // Keep the destination clean; the dump stays for the caller
        let _ = std::fs::remove_file(&tmp_path);
        return Err(BackupError::ArchiveWrite(e.to_string()));
    }

    if let Err(e) = std::fs::rename(&tmp_path, &final_path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(BackupError::ArchiveWrite(format!(
            "failed to move archive into place at {}: {}",
            final_path.display(),
            e
        )));
    }

    let size_bytes = std::fs::metadata(&final_path)
        .map(|m| m.len())
        .map_err(|e| BackupError::ArchiveWrite(e.to_string()))?;

    info!(
        "Created artifact {} ({} bytes)",
        final_path.display(),
        size_bytes
    );

    Ok(Artifact {
        target: target_name.to_string(),
        created_at: timestamp,
        path: final_path,
        size_bytes,
    })
}

fn compress_into(source: &Path, dest: &Path) -> std::io::Result<()> {
    let mut reader = File::open(source)?;
    let out = File::create(dest)?;
    let mut encoder = GzEncoder::new(out, Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    let out = encoder.finish()?;
    out.sync_all()?;
    Ok(())
}

/// Pick a final artifact path, appending a counter when a same-millisecond
/// artifact already exists.
fn unique_artifact_path(dest_dir: &Path, target_name: &str, timestamp: DateTime<Utc>) -> PathBuf {
    let base = format!("{}_{}", target_name, timestamp.format(TIMESTAMP_FORMAT));
    let candidate = dest_dir.join(format!("{}{}", base, ARTIFACT_SUFFIX));
    if !candidate.exists() {
        return candidate;
    }
    let mut counter = 1u32;
    loop {
        let candidate = dest_dir.join(format!("{}-{}{}", base, counter, ARTIFACT_SUFFIX));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Whether `file_name` is an artifact belonging to `target_name`.
pub fn is_artifact_for(file_name: &str, target_name: &str) -> bool {
    file_name.starts_with(&format!("{}_", target_name)) && file_name.ends_with(ARTIFACT_SUFFIX)
}

/// Recover the creation timestamp encoded in an artifact file name.
pub fn parse_artifact_timestamp(file_name: &str, target_name: &str) -> Option<DateTime<Utc>> {
    let stem = file_name
        .strip_prefix(&format!("{}_", target_name))?
        .strip_suffix(ARTIFACT_SUFFIX)?;
    // Drop a collision counter suffix if present
    let stamp = stem.split('-').next()?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn ts(ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 31, 12, 30, 15)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(ms as i64))
            .unwrap()
    }

    #[test]
    fn test_archive_roundtrip() {
        let dir = TempDir::new().unwrap();
        let dump = dir.path().join("shop.sql");
        std::fs::write(&dump, "CREATE TABLE t (id int);\n").unwrap();
        let dest = dir.path().join("artifacts");

        let artifact = archive(&dump, "shop", &dest, ts(123)).unwrap();

        assert_eq!(artifact.target, "shop");
        assert!(artifact.size_bytes > 0);
        assert_eq!(
            artifact.path.file_name().unwrap().to_str().unwrap(),
            "shop_20260831T123015123.sql.gz"
        );

        let mut decoded = String::new();
        GzDecoder::new(File::open(&artifact.path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "CREATE TABLE t (id int);\n");

        // Source dump preserved, no tmp file left behind
        assert!(dump.exists());
        let leftovers: Vec<_> = std::fs::read_dir(&dest)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_same_timestamp_gets_counter_suffix() {
        let dir = TempDir::new().unwrap();
        let dump = dir.path().join("shop.sql");
        std::fs::write(&dump, "data").unwrap();
        let dest = dir.path().join("artifacts");

        let first = archive(&dump, "shop", &dest, ts(0)).unwrap();
        let second = archive(&dump, "shop", &dest, ts(0)).unwrap();

        assert_ne!(first.path, second.path);
        assert!(second
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("-1"));
    }

    #[test]
    fn test_names_sort_chronologically() {
        let earlier = format!("shop_{}", ts(100).format(TIMESTAMP_FORMAT));
        let later = format!("shop_{}", ts(200).format(TIMESTAMP_FORMAT));
        assert!(earlier < later);
    }

    #[test]
    fn test_failure_preserves_source_dump() {
        let dir = TempDir::new().unwrap();
        let dump = dir.path().join("shop.sql");
        std::fs::write(&dump, "data").unwrap();
        // Destination path collides with an existing file, so create_dir_all fails
        let blocked = dir.path().join("artifacts");
        std::fs::write(&blocked, "not a directory").unwrap();

        let result = archive(&dump, "shop", &blocked, ts(0));

        assert!(matches!(result, Err(BackupError::ArchiveWrite(_))));
        assert!(dump.exists());
    }

    #[test]
    fn test_parse_artifact_timestamp() {
        let name = "shop_20260831T123015123.sql.gz";
        assert_eq!(parse_artifact_timestamp(name, "shop"), Some(ts(123)));

        let with_counter = "shop_20260831T123015123-2.sql.gz";
        assert_eq!(parse_artifact_timestamp(with_counter, "shop"), Some(ts(123)));

        assert_eq!(parse_artifact_timestamp("other_20260831T123015123.sql.gz", "shop"), None);
        assert_eq!(parse_artifact_timestamp("shop_notatimestamp.sql.gz", "shop"), None);
    }

    #[test]
    fn test_is_artifact_for() {
        assert!(is_artifact_for("shop_20260831T123015123.sql.gz", "shop"));
        assert!(!is_artifact_for("shop_20260831T123015123.sql", "shop"));
        assert!(!is_artifact_for("inventory_20260831T123015123.sql.gz", "shop"));
    }
}
