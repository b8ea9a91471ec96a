//! tickcache - frame-driven caches for game API data.
//!
//! Keeps account, world boss and item data from the game's REST API fresh
//! on per-cache intervals, snapshotting slow-changing data to disk.

mod api;
mod app;
mod auth;
mod config;
mod models;
mod services;
#[cfg(test)]
mod testing;

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tickcache_core::SystemClock;

use api::ApiClient;
use app::App;
use auth::CredentialStore;
use config::Config;

// ============================================================================
// Constants
// ============================================================================

/// Environment variable that overrides the configured API key
const API_KEY_ENV: &str = "TICKCACHE_API_KEY";

/// Prefix of the daily rolling log file in the cache directory
const LOG_FILE_PREFIX: &str = "tickcache.log";

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the file writer on drop.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(filter)
        .init();

    guard
}

/// API key from the environment, then the config file, then the keychain.
fn resolve_api_key(config: &Config) -> Option<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            return Some(key.trim().to_string());
        }
    }
    if let Some(ref key) = config.api_key {
        return Some(key.clone());
    }
    if CredentialStore::has_key() {
        match CredentialStore::get_key() {
            Ok(key) => return Some(key),
            Err(e) => warn!(error = format!("{:#}", e), "Failed to read API key from keychain"),
        }
    }
    None
}

/// Forward service names typed on stdin as reload requests.
fn spawn_reload_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    // Check for CLI commands
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 && args[1] == "--store-key" {
        CredentialStore::store_key(&args[2])?;
        eprintln!("API key stored in the OS keychain");
        return Ok(());
    }
    if args.len() > 1 && args[1] == "--forget-key" {
        CredentialStore::delete_key()?;
        eprintln!("API key removed from the OS keychain");
        return Ok(());
    }

    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    std::fs::create_dir_all(&cache_dir)?;

    // Initialize logging
    let _log_guard = init_tracing(&cache_dir);
    info!("tickcache starting");
    match config_error {
        Some(e) => warn!(error = format!("{:#}", e), "Failed to load config, using defaults"),
        None => {
            if let Ok(path) = Config::config_path() {
                if !path.exists() {
                    if let Err(e) = config.save() {
                        warn!(error = format!("{:#}", e), "Failed to write default config");
                    }
                }
            }
        }
    }

    let mut client = ApiClient::new(&config.api_base_url)?;
    match resolve_api_key(&config) {
        Some(key) => client.set_token(key),
        None => warn!("No API key configured; caches that need permissions will not refresh"),
    }
    match client.refresh_permissions().await {
        Ok(scopes) => info!(scopes = ?scopes, "API key permissions loaded"),
        Err(e) => warn!(error = %e, "Failed to load API key permissions"),
    }

    let mut app = App::new(&config, Arc::new(client), Arc::new(SystemClock), &cache_dir);
    app.start_all().await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
        }
    };
    let result = app.run(shutdown, spawn_reload_reader()).await;

    app.dispose_all().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }

    info!("tickcache shutting down");
    Ok(())
}
