//! Run-report notification dispatch
//!
//! One notification per run, sent through the channel selected at
//! construction from configuration. Delivery failure never alters a
//! [`RunResult`]; the caller surfaces it through logs and the exit code.

use crate::config::{NotificationChannel, NotificationConfig};
use crate::errors::BackupError;
use crate::managers::backup::{RunResult, RunStatus, TargetOutcome, TargetStatus};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Longest error text included in a report; keeps messages bounded
const MAX_ERROR_CHARS: usize = 500;

/// Capability interface for operator-facing notification channels
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, result: &RunResult) -> Result<(), BackupError>;
}

/// Select the channel implementation from configuration
pub fn from_config(config: &NotificationConfig) -> Box<dyn Notifier> {
    match &config.channel {
        NotificationChannel::None => Box::new(NullNotifier),
        NotificationChannel::Telegram { chat_id, token_env } => Box::new(TelegramNotifier {
            chat_id: chat_id.clone(),
            token_env: token_env.clone(),
        }),
        NotificationChannel::Webhook { url } => Box::new(WebhookNotifier { url: url.clone() }),
    }
}

/// No-op channel for installations without notifications
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _result: &RunResult) -> Result<(), BackupError> {
        debug!("No notification channel configured, skipping report");
        Ok(())
    }
}

/// Telegram Bot API channel (sendMessage, HTML parse mode)
pub struct TelegramNotifier {
    chat_id: String,
    /// Env var holding the bot token; never stored in config
    token_env: String,
}

#[derive(Serialize)]
struct TelegramPayload<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, result: &RunResult) -> Result<(), BackupError> {
        let token = std::env::var(&self.token_env).map_err(|_| {
            BackupError::Delivery(format!("bot token env var '{}' not set", self.token_env))
        })?;

        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        let payload = TelegramPayload {
            chat_id: &self.chat_id,
            text: telegram_text(result),
            parse_mode: "HTML",
        };

        let client = http_client()?;
        let response = client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackupError::Delivery(format!("telegram request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackupError::Delivery(format!(
                "telegram responded with {}: {}",
                status, body
            )));
        }

        info!("Telegram: run report sent");
        Ok(())
    }
}

/// Generic JSON webhook channel
pub struct WebhookNotifier {
    url: String,
}

#[derive(Serialize)]
struct WebhookPayload {
    status: String,
    started_at: String,
    finished_at: String,
    targets: Vec<WebhookTarget>,
}

#[derive(Serialize)]
struct WebhookTarget {
    target: String,
    status: String,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, result: &RunResult) -> Result<(), BackupError> {
        let client = http_client()?;
        let response = client
            .post(&self.url)
            .json(&webhook_payload(result))
            .send()
            .await
            .map_err(|e| BackupError::Delivery(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackupError::Delivery(format!(
                "webhook responded with {}: {}",
                status, body
            )));
        }

        info!("Webhook: run report sent");
        Ok(())
    }
}

fn http_client() -> Result<reqwest::Client, BackupError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| BackupError::Delivery(format!("failed to create HTTP client: {}", e)))
}

fn status_heading(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "\u{2705} <b>Backup Successful</b>",
        RunStatus::PartialFailure => "\u{26A0}\u{FE0F} <b>Backup Partially Failed</b>",
        RunStatus::TotalFailure => "\u{274C} <b>Backup Failed</b>",
        RunStatus::Interrupted => "\u{23F9} <b>Backup Interrupted</b>",
    }
}

fn status_word(status: TargetStatus) -> &'static str {
    match status {
        TargetStatus::Succeeded => "succeeded",
        TargetStatus::Failed => "failed",
        TargetStatus::Skipped => "skipped",
    }
}

/// HTML report for Telegram, in the shape operators already know:
/// one heading, then one line per target.
fn telegram_text(result: &RunResult) -> String {
    let mut lines = vec![status_heading(result.status).to_string(), String::new()];

    for outcome in &result.outcomes {
        lines.push(target_line(outcome));
    }

    lines.push(String::new());
    lines.push(format!(
        "\u{23F1} <b>Duration:</b> {}",
        format_duration(
            (result.finished_at - result.started_at)
                .to_std()
                .unwrap_or_default()
        )
    ));

    lines.join("\n")
}

fn target_line(outcome: &TargetOutcome) -> String {
    match outcome.status {
        TargetStatus::Succeeded => {
            let artifact = outcome.artifact.as_ref();
            let name = artifact
                .and_then(|a| a.path.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let size = artifact.map(|a| a.size_bytes).unwrap_or(0);
            format!(
                "\u{1F4E6} <b>{}:</b> {} ({}, {} attempt{})",
                outcome.target,
                name,
                format_size(size),
                outcome.attempts,
                if outcome.attempts == 1 { "" } else { "s" }
            )
        }
        TargetStatus::Failed => {
            let error = outcome
                .error
                .as_ref()
                .map(|e| truncate_error(&e.to_string()))
                .unwrap_or_default();
            format!(
                "\u{274C} <b>{}:</b> failed after {} attempt(s)\n<pre>{}</pre>",
                outcome.target, outcome.attempts, error
            )
        }
        TargetStatus::Skipped => format!("\u{23ED} <b>{}:</b> skipped", outcome.target),
    }
}

fn webhook_payload(result: &RunResult) -> WebhookPayload {
    WebhookPayload {
        status: format!("{:?}", result.status).to_lowercase(),
        started_at: result.started_at.to_rfc3339(),
        finished_at: result.finished_at.to_rfc3339(),
        targets: result
            .outcomes
            .iter()
            .map(|o| WebhookTarget {
                target: o.target.clone(),
                status: status_word(o.status).to_string(),
                attempts: o.attempts,
                artifact: o
                    .artifact
                    .as_ref()
                    .map(|a| a.path.display().to_string()),
                size_bytes: o.artifact.as_ref().map(|a| a.size_bytes),
                error: o.error.as_ref().map(|e| truncate_error(&e.to_string())),
            })
            .collect(),
    }
}

fn truncate_error(error: &str) -> String {
    if error.chars().count() > MAX_ERROR_CHARS {
        let cut: String = error.chars().take(MAX_ERROR_CHARS - 3).collect();
        format!("{}...", cut)
    } else {
        error.to_string()
    }
}

/// Format a byte count the way the reports show sizes
fn format_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if (bytes as f64) < MB {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / MB)
    }
}

/// Format duration in human-readable form
fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        let minutes = seconds / 60;
        let secs = seconds % 60;
        if secs == 0 {
            format!("{}m", minutes)
        } else {
            format!("{}m {}s", minutes, secs)
        }
    } else {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        if minutes == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, minutes)
        }
    }
}
