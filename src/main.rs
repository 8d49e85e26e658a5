use anyhow::Result;
use clap::{Parser, Subcommand};
use dump_manager::config;
use dump_manager::managers::{logging, notification};
use dump_manager::utils::{locker::RunLock, RealDumpRunner};
use dump_manager::{BackupOrchestrator, RunResult, TargetStatus};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "dump-manager")]
#[command(about = "Periodic database backup orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/dump-manager/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run backups for all enabled targets or a specific target
    Run {
        /// Specific target to back up (defaults to all enabled targets)
        #[arg(short, long)]
        target: Option<String>,
    },

    /// List all configured targets
    List,

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Cron invokes the binary without a subcommand
    let command = cli.command.unwrap_or(Commands::Run { target: None });

    match command {
        Commands::Validate => {
            logging::init_console_logging();
            let config = config::load_config(&cli.config)?;
            println!("Configuration is valid!");
            println!("Targets: {}", config.targets.len());
            Ok(())
        }

        Commands::List => {
            logging::init_console_logging();
            let config = config::load_config(&cli.config)?;
            println!("Configured targets:");
            for target in config::resolve_all_targets(&config) {
                println!("  {}", target.name);
                println!("    Engine: {:?}", target.engine);
                println!("    Database: {}@{}:{}", target.database, target.host, target.port);
                println!("    Enabled: {}", target.enabled);
                println!(
                    "    Retention: keep_last={:?}, max_age_days={:?}",
                    target.retention.keep_last, target.retention.max_age_days
                );
                println!();
            }
            Ok(())
        }

        Commands::Run { target } => run_backups(&cli.config, target).await,
    }
}

async fn run_backups(config_path: &PathBuf, target_filter: Option<String>) -> Result<()> {
    let config = config::load_config(config_path)?;

    // Logging guard must stay alive for the whole run
    let logging_config = logging::LoggingConfig::from_config(
        &config.global.log_directory,
        &config.global.log_level,
        config.global.log_max_files,
    );
    let _log_guard = logging::init_logging(&logging_config)?;

    // One run at a time per destination root
    let _lock = RunLock::acquire(&config.global.destination_root)?;

    let notifier = notification::from_config(&config.notifications);

    let mut orchestrator = BackupOrchestrator::new(&config, RealDumpRunner::new());
    if let Some(ref name) = target_filter {
        orchestrator = orchestrator.with_target_filter(name)?;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Shutdown signal received, interrupting run");
                cancel.cancel();
            }
        });
    }

    let result = orchestrator.run(cancel).await;
    print_summary(&result);

    let mut failed = result.has_failures();

    // A run whose report never reached the operator must not exit clean
    if let Err(e) = notifier.notify(&result).await {
        error!("Failed to deliver run report: {}", e);
        failed = true;
    }

    if failed {
        anyhow::bail!("backup run finished with status {:?}", result.status);
    }
    Ok(())
}

fn print_summary(result: &RunResult) {
    println!("=== Backup Run Summary ===");
    for outcome in &result.outcomes {
        match outcome.status {
            TargetStatus::Succeeded => {
                let artifact = outcome.artifact.as_ref();
                println!(
                    "  ✓ {} - {} ({} bytes, {} attempt(s))",
                    outcome.target,
                    artifact
                        .map(|a| a.path.display().to_string())
                        .unwrap_or_default(),
                    artifact.map(|a| a.size_bytes).unwrap_or(0),
                    outcome.attempts
                );
            }
            TargetStatus::Failed => {
                println!(
                    "  ✗ {} - failed after {} attempt(s): {}",
                    outcome.target,
                    outcome.attempts,
                    outcome
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_default()
                );
            }
            TargetStatus::Skipped => println!("  - {} - skipped", outcome.target),
        }
    }
    println!("Status: {:?}", result.status);
}
