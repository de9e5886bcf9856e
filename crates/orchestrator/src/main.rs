//! Operational CLI for the orchestration core.
//!
//! The server embeds this crate as a library and supplies its own SDK
//! connector to `ServiceContainer::startup`; the binary covers the
//! operational side: config validation and a read-only look at the data
//! directory (sessions, jobs, costs, audit stats).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use va_domain::config::{Config, ConfigSeverity};
use va_orchestrator::jobs::JobState;

#[derive(Parser)]
#[command(name = "videoagent", about = "Video-understanding agent orchestration core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the configuration and exit non-zero on errors.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Summarize the data directory: sessions, jobs, costs, audit stats.
    Status,
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Config {
            command: ConfigCommand::Validate,
        } => {
            let config = Config::load(Some(&cli.config))?;
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("configuration ok");
            Ok(())
        }
        Command::Status => {
            let config = Config::load(Some(&cli.config))?;
            status(&config).await
        }
        Command::Version => {
            println!("videoagent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
}

async fn status(config: &Config) -> anyhow::Result<()> {
    let storage = va_storage::StorageManager::new(&config.data_path)?;
    let audit = va_audit::AuditService::new(&config.data_path, &config.audit)?;
    let jobs = va_orchestrator::JobQueue::new(&config.data_path, &config.jobs)?;

    let sessions = storage.list_sessions(usize::MAX)?;
    println!("sessions: {}", sessions.len());
    for session in sessions.iter().take(10) {
        println!(
            "  {}  {:>4} msgs  {}  {}",
            session.session_id,
            session.message_count,
            session.updated_at.format("%Y-%m-%d %H:%M"),
            session.title,
        );
    }

    let global = storage.get_global_cost()?;
    println!(
        "cost: ${:.4} across {} sessions ({} in / {} out tokens)",
        global.total_cost_usd,
        global.session_count,
        global.total_input_tokens,
        global.total_output_tokens,
    );

    let all_jobs = jobs.list_jobs(None);
    let pending = jobs.list_jobs(Some(JobState::Pending)).len();
    let running = jobs.list_jobs(Some(JobState::Running)).len();
    let failed = jobs.list_jobs(Some(JobState::Failed)).len();
    println!(
        "jobs: {} total ({pending} pending, {running} running, {failed} failed)",
        all_jobs.len()
    );

    let stats = audit.get_stats().await;
    println!(
        "audit: {} events, {} tools invoked, {} blocked, avg tool {}",
        stats.total_events,
        stats.tools_invoked,
        stats.tools_blocked,
        stats
            .avg_tool_duration_ms
            .map(|ms| format!("{ms:.0}ms"))
            .unwrap_or_else(|| "n/a".into()),
    );

    let transcripts = storage.list_transcripts()?;
    println!("transcripts: {}", transcripts.len());

    Ok(())
}
