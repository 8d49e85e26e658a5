//! Configuration module for dump-manager
//!
//! Handles loading, validating, and resolving configuration from TOML files.
//! Settings are applied per target in this order (later overrides earlier):
//!
//! 1. Global defaults (`[global]`)
//! 2. Target-level settings (`[targets.<name>]`)
//!
//! Validation is fail-fast: a single malformed target aborts startup rather
//! than letting a run proceed with a partial backup plan.

mod loader;
mod types;

pub use loader::{
    backoff_delay, load_config, resolve_all_targets, resolve_target, ConfigError, Result,
};
pub use types::*;

/// Expand tilde (~) in path to home directory
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(std::path::Path::new("~/backups"));
        assert!(!expanded.starts_with("~"));

        let absolute = PathBuf::from("/var/backups");
        assert_eq!(expand_tilde(&absolute), absolute);
    }
}
