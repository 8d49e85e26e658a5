use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub global: GlobalConfig,
    pub targets: HashMap<String, TargetConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Root directory artifacts are written under (one subdirectory per target)
    pub destination_root: PathBuf,

    /// Working directory for in-progress dump files
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Per-attempt dump timeout
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Total attempts per target (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff between attempts
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_seconds: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_seconds: u64,

    /// Worker pool size for concurrent targets
    #[serde(default = "default_parallel_targets")]
    pub max_parallel_targets: usize,

    /// Logging configuration
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

/// Database engine behind a target
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    Mysql,
}

impl Engine {
    pub fn default_port(self) -> u16 {
        match self {
            Engine::Postgres => 5432,
            Engine::Mysql => 3306,
        }
    }

    /// Name of the dump utility looked up on PATH
    pub fn dump_program(self) -> &'static str {
        match self {
            Engine::Postgres => "pg_dump",
            Engine::Mysql => "mysqldump",
        }
    }

    /// Environment variable the utility reads the password from
    pub fn password_env_var(self) -> &'static str {
        match self {
            Engine::Postgres => "PGPASSWORD",
            Engine::Mysql => "MYSQL_PWD",
        }
    }
}

/// One database configured for backup (raw, before resolution)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub engine: Engine,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub database: String,

    /// Environment variable holding the password (preferred)
    #[serde(default)]
    pub password_env: Option<String>,
    /// File holding the password (alternative to password_env)
    #[serde(default)]
    pub password_file: Option<PathBuf>,

    /// Explicit path to the dump binary (defaults to PATH lookup)
    #[serde(default)]
    pub dump_binary: Option<PathBuf>,

    /// Per-target overrides
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub retention: RetentionPolicy,
}

/// Which artifacts to keep for a target.
///
/// When both dimensions are configured an artifact survives if it satisfies
/// either one (union of keep sets). With neither configured nothing is ever
/// deleted.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct RetentionPolicy {
    /// Keep the newest N artifacts
    #[serde(default)]
    pub keep_last: Option<u32>,
    /// Keep artifacts younger than this many days
    #[serde(default)]
    pub max_age_days: Option<u32>,
}

impl RetentionPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.keep_last.is_none() && self.max_age_days.is_none()
    }
}

/// Notification configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub channel: NotificationChannel,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotificationChannel {
    #[default]
    None,
    Telegram {
        chat_id: String,
        /// Env var holding the bot token
        #[serde(default = "default_telegram_token_env")]
        token_env: String,
    },
    Webhook {
        url: String,
    },
}

/// Target configuration after merging per-target overrides with globals
#[derive(Debug, Clone)]
pub struct BackupTarget {
    pub name: String,
    pub enabled: bool,
    pub engine: Engine,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database: String,
    pub password_env: Option<String>,
    pub password_file: Option<PathBuf>,
    pub dump_binary: Option<PathBuf>,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub retention: RetentionPolicy,
    /// destination_root/<name>
    pub dest_dir: PathBuf,
}

// Default value functions

fn default_timeout() -> u64 { 3600 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_initial() -> u64 { 5 }
fn default_backoff_max() -> u64 { 300 }
fn default_parallel_targets() -> usize { 1 }
fn default_log_directory() -> PathBuf { PathBuf::from("~/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
fn default_enabled() -> bool { true }
fn default_telegram_token_env() -> String { "TELEGRAM_BOT_TOKEN".to_string() }
