//! alertdesk - terminal front end for the operator console session layer.
//!
//! Logs in against the configured backend, reports session and lockout
//! state, lists the security audit trail and watches a session for
//! inactivity.

mod app;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alertdesk_core::Config;
use app::App;

/// Number of audit entries shown when no limit is given
const DEFAULT_AUDIT_LIMIT: usize = 20;

/// Rolling log file prefix inside `<data_dir>/logs`
const LOG_FILE_PREFIX: &str = "alertdesk.log";

#[derive(Parser)]
#[command(name = "alertdesk", version, about = "Operator console session tools")]
struct Cli {
    /// Also write logs to a daily rolling file in the data directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and start a session
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// End the current session
    Logout,
    /// Show the current session and lockout state
    Status,
    /// Print the most recent audit events
    Audit {
        #[arg(short, long, default_value_t = DEFAULT_AUDIT_LIMIT)]
        limit: usize,
    },
    /// Keep the session open, ending it after the inactivity timeout.
    /// Each line typed counts as activity; `logout` ends the session.
    Watch,
}

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). The returned guard must
/// stay alive for the file writer to flush.
fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load()?;

    let log_dir = if cli.log_file {
        Some(config.data_dir()?.join("logs"))
    } else {
        None
    };
    let _log_guard = init_tracing(log_dir);
    info!(backend = %config.backend, "alertdesk starting");

    let mut app = App::new(config)?;
    match cli.command {
        Command::Login { username } => app.login_interactive(username).await,
        Command::Logout => app.logout().await,
        Command::Status => app.status().await,
        Command::Audit { limit } => {
            app.print_audit(limit);
            Ok(())
        }
        Command::Watch => app.watch().await,
    }
}
