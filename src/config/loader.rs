use super::types::*;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Target '{0}': {1}")]
    InvalidTarget(String, String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate configuration from a TOML file.
///
/// Any malformed target fails the whole load; a run never silently starts
/// with a partial backup plan.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.global.destination_root.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "destination_root must not be empty".to_string(),
        ));
    }

    if config.global.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "max_attempts must be at least 1".to_string(),
        ));
    }

    if config.global.max_parallel_targets == 0 {
        return Err(ConfigError::ValidationError(
            "max_parallel_targets must be at least 1".to_string(),
        ));
    }

    if config.global.backoff_initial_seconds > config.global.backoff_max_seconds {
        return Err(ConfigError::ValidationError(format!(
            "backoff_initial_seconds ({}) exceeds backoff_max_seconds ({})",
            config.global.backoff_initial_seconds, config.global.backoff_max_seconds
        )));
    }

    if config.targets.is_empty() {
        return Err(ConfigError::ValidationError(
            "No targets defined".to_string(),
        ));
    }

    for (name, target) in &config.targets {
        validate_target(name, target)?;
    }

    Ok(())
}

fn validate_target(name: &str, target: &TargetConfig) -> Result<()> {
    // Target names become directory names and filename prefixes
    if name.is_empty()
        || name
            .chars()
            .any(|c| !c.is_ascii_alphanumeric() && c != '_' && c != '-')
    {
        return Err(ConfigError::InvalidTarget(
            name.to_string(),
            "name must be non-empty and contain only alphanumerics, '-' or '_'".to_string(),
        ));
    }

    if target.host.trim().is_empty() {
        return Err(ConfigError::InvalidTarget(
            name.to_string(),
            "host must not be empty".to_string(),
        ));
    }
    if target.username.trim().is_empty() {
        return Err(ConfigError::InvalidTarget(
            name.to_string(),
            "username must not be empty".to_string(),
        ));
    }
    if target.database.trim().is_empty() {
        return Err(ConfigError::InvalidTarget(
            name.to_string(),
            "database must not be empty".to_string(),
        ));
    }

    if target.password_env.is_some() && target.password_file.is_some() {
        return Err(ConfigError::InvalidTarget(
            name.to_string(),
            "password_env and password_file are mutually exclusive".to_string(),
        ));
    }

    if let Some(0) = target.max_attempts {
        return Err(ConfigError::InvalidTarget(
            name.to_string(),
            "max_attempts must be at least 1".to_string(),
        ));
    }

    Ok(())
}

/// Resolve a target by merging its overrides with the global defaults
pub fn resolve_target(name: &str, target: &TargetConfig, global: &GlobalConfig) -> BackupTarget {
    BackupTarget {
        name: name.to_string(),
        enabled: target.enabled,
        engine: target.engine,
        host: target.host.clone(),
        port: target.port.unwrap_or_else(|| target.engine.default_port()),
        username: target.username.clone(),
        database: target.database.clone(),
        password_env: target.password_env.clone(),
        password_file: target.password_file.clone(),
        dump_binary: target.dump_binary.clone(),
        timeout_seconds: target.timeout_seconds.unwrap_or(global.timeout_seconds),
        max_attempts: target.max_attempts.unwrap_or(global.max_attempts),
        retention: target.retention,
        dest_dir: global.destination_root.join(name),
    }
}

/// Resolve all targets, sorted by name for a deterministic run order
pub fn resolve_all_targets(config: &Config) -> Vec<BackupTarget> {
    let mut targets: Vec<BackupTarget> = config
        .targets
        .iter()
        .map(|(name, target)| resolve_target(name, target, &config.global))
        .collect();
    targets.sort_by(|a, b| a.name.cmp(&b.name));
    targets
}

/// Delay before re-entering the dump state for the given completed attempt
/// count (1-based).
pub fn backoff_delay(global: &GlobalConfig, attempts_made: u32) -> Duration {
    let initial = global.backoff_initial_seconds;
    let secs = match global.backoff {
        BackoffKind::Fixed => initial,
        BackoffKind::Exponential => initial
            .saturating_mul(1u64 << attempts_made.saturating_sub(1).min(32))
            .min(global.backoff_max_seconds),
    };
    Duration::from_secs(secs.min(global.backoff_max_seconds))
}
