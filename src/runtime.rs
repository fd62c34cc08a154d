use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::Bot;
use thiserror::Error;
use tracing::{info, warn};

use crate::bot::{BotSettings, ElectroBot};
use crate::channels::TelegramAdapter;
use crate::config::Config;
use crate::db::{Database, DB_FILE_NAME};
use crate::error::ElectroBotError;
use crate::store::{Storage, ALIVE_EVENT};
use crate::time::format_local;

/// Why the process could not come up. Each class has its own exit code.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Failed to start bot due to DB error: {0}")]
    Storage(ElectroBotError),

    #[error("TELEGRAM_BOT_TOKEN env variable is not set")]
    MissingToken,

    #[error("Failed to start bot due to Telegram error: {0}")]
    Platform(ElectroBotError),

    #[error("Invalid configuration: {0}")]
    Config(ElectroBotError),
}

impl StartupError {
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Storage(_) => 1,
            StartupError::MissingToken => 2,
            StartupError::Platform(_) => 3,
            StartupError::Config(_) => 4,
        }
    }
}

/// Tells a supervising systemd that startup finished. A no-op elsewhere.
fn notify_ready() {
    #[cfg(unix)]
    {
        if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
            warn!("Failed to send readiness notification: {e}");
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                None
            }
        };

    #[cfg(unix)]
    let sigterm_future = async {
        match sigterm.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }
}

/// Opens storage, connects to Telegram, runs until a termination signal and
/// shuts down in order.
pub async fn run(config: Config) -> Result<(), StartupError> {
    run_with_token(config, Config::bot_token_from_env()).await
}

/// `run` with the token already resolved. Storage is opened first so a bad
/// working directory is reported even when the token is missing.
async fn run_with_token(config: Config, token: Option<String>) -> Result<(), StartupError> {
    let db = Arc::new(Database::new(&config.working_dir).map_err(StartupError::Storage)?);

    let token = token.ok_or(StartupError::MissingToken)?;
    let channel = Arc::new(TelegramAdapter::new("telegram".into(), Bot::new(token)));

    let mut bot = ElectroBot::launch(channel, db.clone(), BotSettings::from(&config))
        .await
        .map_err(StartupError::Platform)?;

    notify_ready();
    info!(working_dir = %config.working_dir, "Bot is running");

    wait_for_shutdown_signal().await;

    bot.close().await;
    drop(bot);
    drop(db);
    info!("Bot stopped");
    Ok(())
}

/// What `electrobot status` prints, read straight from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub db_path: PathBuf,
    pub subscribers: i64,
    pub last_alive: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub fn collect(config: &Config) -> Result<Self, StartupError> {
        let db = Database::new(&config.working_dir).map_err(StartupError::Storage)?;
        let subscribers = db.subscriber_count().map_err(StartupError::Storage)?;
        let last_alive = match db.latest_event_time(ALIVE_EVENT) {
            Ok(at) => Some(at),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(StartupError::Storage(e)),
        };
        Ok(StatusReport {
            db_path: PathBuf::from(&config.working_dir).join(DB_FILE_NAME),
            subscribers,
            last_alive,
        })
    }

    pub fn render(&self, tz: Option<chrono_tz::Tz>) -> String {
        let last_alive = self
            .last_alive
            .map(|at| format_local(at, tz))
            .unwrap_or_else(|| "never".to_string());
        format!(
            "Database: {}\nSubscribers: {}\nLast alive time: {}",
            self.db_path.display(),
            self.subscribers,
            last_alive
        )
    }
}
