//! `taskflow`: command-line front end for the task backend.
//!
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/taskflow/config.toml`). The session credential is kept in a
//! file between invocations.
//!
//! ```bash
//! taskflow login --email ann@example.com --password hunter2
//! taskflow tasks --filter assigned
//! taskflow status 65f1c0 completed
//!
//! # Stay connected and print live updates
//! taskflow watch
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use taskflow::cli;
use taskflow::config::{CliArgs, ClientConfig};
use taskflow::credentials::{FileCredentialStore, MemoryCredentialStore};
use taskflow::session::Session;

#[tokio::main]
async fn main() -> ExitCode {
    let mut cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; stdout is reserved for command output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let Some(command) = cli.command.take() else {
        if let Err(e) = cli::write_usage(&mut std::io::stdout()) {
            tracing::warn!(error = %e, "failed to print usage");
            eprintln!("Error: {e}");
        }
        return ExitCode::from(2);
    };

    tracing::info!(api = %config.api_url, channel = %config.channel.url, "taskflow starting");

    let session = match &config.session_file {
        Some(path) => Session::new(&config, FileCredentialStore::new(path)),
        None => Session::new(&config, MemoryCredentialStore::new()),
    };
    let session = match session {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = cli::run(command, &session).await;
    drop(session);
    tracing::info!("taskflow exiting");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::warn!(error = %e, "command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskflow.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
