//! Courier - a command-line client for the delivery-booking service.
//!
//! Restores the saved session, runs one command against the API, and tells
//! the user when the server has ended their session.

mod commands;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use courier_core::{ApiClient, ApiError, Config, SessionController, SessionEvent};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;

/// Log file name inside the cache directory
const LOG_FILE: &str = "courier.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and, when a cache directory exists, to a daily log file.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    }
}

/// Print the notice for any session the server ended during the command
fn report_expiry(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        if event == SessionEvent::Expired {
            eprintln!("Your session has expired. Please log in again.");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = load_config();
    let log_guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n", e);
            commands::print_usage();
            drop(log_guard);
            std::process::exit(2);
        }
    };
    if matches!(command, Command::Help) {
        commands::print_usage();
        return Ok(());
    }

    info!(api = %config.api_base_url, "Courier starting");

    let session = Arc::new(SessionController::new(config.open_store()?));
    let mut events = session.events();

    // Nothing below decides anything until the session is known.
    session.restore().await;

    let api = ApiClient::new(&config, session.clone())?;
    let result = commands::run(command, &api).await;

    report_expiry(&mut events);

    if let Err(e) = result {
        match e.downcast_ref::<ApiError>() {
            Some(api_error) => {
                warn!(error = %api_error, "Command failed");
                eprintln!("Error: {}", api_error.user_message());
            }
            None => eprintln!("Error: {:#}", e),
        }
        drop(log_guard);
        std::process::exit(1);
    }

    Ok(())
}
