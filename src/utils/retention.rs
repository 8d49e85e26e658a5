//! Retention enforcement for a target's artifact directory
//!
//! The policy has two independent keep-windows, "newest N" and "age <= D
//! days"; an artifact survives if it falls inside either configured window.
//! The artifact produced by the current run is always kept, so a "keep 0"
//! misconfiguration cannot delete the backup that was just made.

use crate::config::RetentionPolicy;
use crate::utils::archive;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Delete artifacts of `target_name` in `dest_dir` that fall outside the
/// policy. `current` is the artifact created by this run, never deleted.
///
/// Per-file deletion failures are logged and skipped; the returned list holds
/// only the paths actually deleted.
pub fn enforce(
    target_name: &str,
    dest_dir: &Path,
    policy: &RetentionPolicy,
    current: Option<&Path>,
) -> Vec<PathBuf> {
    if policy.is_unbounded() {
        debug!("No retention policy for target '{}', keeping all", target_name);
        return Vec::new();
    }

    let entries = match std::fs::read_dir(dest_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                "Failed to list artifact directory {}: {}",
                dest_dir.display(),
                e
            );
            return Vec::new();
        }
    };

    let mut artifacts: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            archive::is_artifact_for(&name, target_name).then(|| (name, entry.path()))
        })
        .collect();

    // Filename order is chronological order; newest first
    artifacts.sort_by(|a, b| b.0.cmp(&a.0));

    let now = Utc::now();
    let mut deleted = Vec::new();

    for (index, (name, path)) in artifacts.iter().enumerate() {
        if current.is_some_and(|c| c == path.as_path()) {
            continue;
        }

        let kept_by_count = policy
            .keep_last
            .is_some_and(|n| (index as u64) < u64::from(n));

        let kept_by_age = policy.max_age_days.is_some_and(|days| {
            match archive::parse_artifact_timestamp(name, target_name) {
                Some(created) => now.signed_duration_since(created).num_days() <= i64::from(days),
                // An artifact whose age cannot be determined is never deleted
                None => true,
            }
        });

        if kept_by_count || kept_by_age {
            continue;
        }

        match std::fs::remove_file(path) {
            Ok(()) => {
                info!("Retention: deleted {}", path.display());
                deleted.push(path.clone());
            }
            Err(e) => {
                warn!("Retention: failed to delete {}: {}", path.display(), e);
            }
        }
    }

    deleted
}
