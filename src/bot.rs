use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::Update;
use crate::channel_adapter::{ChannelAdapter, UpdateReceiver};
use crate::chat_commands::{boot_greeting, handle_chat_command, BotCommand, CommandContext};
use crate::config::Config;
use crate::db::call_blocking;
use crate::error::ElectroBotError;
use crate::store::{Storage, ALIVE_EVENT};
use crate::time::format_local;

#[derive(Debug, Clone)]
pub struct BotSettings {
    pub heartbeat_interval: Duration,
    pub timezone: Option<Tz>,
}

impl From<&Config> for BotSettings {
    fn from(config: &Config) -> Self {
        BotSettings {
            heartbeat_interval: config.heartbeat_interval(),
            timezone: config.tz(),
        }
    }
}

impl Default for BotSettings {
    fn default() -> Self {
        BotSettings::from(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    NotStarted,
    Running,
    ShuttingDown,
    Stopped,
}

/// Everything the event loop task owns.
struct LoopContext {
    channel: Arc<dyn ChannelAdapter>,
    commands: CommandContext,
    bot_username: Option<String>,
    heartbeat_interval: Duration,
}

pub struct ElectroBot {
    channel: Arc<dyn ChannelAdapter>,
    storage: Arc<dyn Storage>,
    settings: BotSettings,
    state: BotState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    last_alive: Option<DateTime<Utc>>,
}

impl ElectroBot {
    pub fn new(
        channel: Arc<dyn ChannelAdapter>,
        storage: Arc<dyn Storage>,
        settings: BotSettings,
    ) -> Self {
        ElectroBot {
            channel,
            storage,
            settings,
            state: BotState::NotStarted,
            cancel: CancellationToken::new(),
            handle: None,
            last_alive: None,
        }
    }

    /// Builds and starts a bot in one step.
    pub async fn launch(
        channel: Arc<dyn ChannelAdapter>,
        storage: Arc<dyn Storage>,
        settings: BotSettings,
    ) -> Result<Self, ElectroBotError> {
        let mut bot = ElectroBot::new(channel, storage, settings);
        bot.start().await?;
        Ok(bot)
    }

    pub fn state(&self) -> BotState {
        self.state
    }

    /// Last time the previous run was known alive; set once started.
    pub fn last_alive(&self) -> Option<DateTime<Utc>> {
        self.last_alive
    }

    /// Authenticates, greets subscribers and spawns the event loop.
    ///
    /// Only platform failures abort startup; storage trouble here is logged.
    pub async fn start(&mut self) -> Result<(), ElectroBotError> {
        if self.state != BotState::NotStarted {
            return Err(ElectroBotError::Task(format!(
                "bot cannot be started from state {:?}",
                self.state
            )));
        }

        let username = self
            .channel
            .authenticate()
            .await
            .map_err(ElectroBotError::Channel)?;
        info!(
            channel = self.channel.name(),
            username = %username,
            "Authenticated with chat platform"
        );

        let launch_time = Utc::now();
        let last_alive = recover_last_alive(&self.storage).await;
        self.last_alive = Some(last_alive);

        let greeting = boot_greeting(launch_time, last_alive, self.settings.timezone);
        notify_all_subscribers(self.channel.as_ref(), &self.storage, &greeting).await;

        let updates = self
            .channel
            .start_updates()
            .await
            .map_err(ElectroBotError::Channel)?;

        let ctx = LoopContext {
            channel: self.channel.clone(),
            commands: CommandContext {
                storage: self.storage.clone(),
                last_shutdown: last_alive,
                timezone: self.settings.timezone,
            },
            bot_username: Some(username).filter(|u| !u.is_empty()),
            heartbeat_interval: self.settings.heartbeat_interval,
        };
        self.handle = Some(tokio::spawn(run_event_loop(
            ctx,
            updates,
            self.cancel.clone(),
        )));
        self.state = BotState::Running;
        Ok(())
    }

    /// Stops the update stream, cancels the loop and waits for it to finish.
    /// A closed bot cannot be started again.
    pub async fn close(&mut self) {
        match self.state {
            BotState::Running => {}
            BotState::NotStarted => {
                self.state = BotState::Stopped;
                return;
            }
            BotState::ShuttingDown | BotState::Stopped => return,
        }

        self.state = BotState::ShuttingDown;
        self.channel.stop_updates().await;
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Event loop task ended abnormally: {e}");
            }
        }
        self.state = BotState::Stopped;
        info!("Bot closed");
    }
}

impl Drop for ElectroBot {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn recover_last_alive(storage: &Arc<dyn Storage>) -> DateTime<Utc> {
    match call_blocking(storage.clone(), |s| s.latest_event_time(ALIVE_EVENT)).await {
        Ok(ts) => ts,
        Err(e) => {
            warn!("Failed to get last alive time: {e}");
            Utc::now()
        }
    }
}

/// Sends `text` to every subscriber, one at a time. Returns how many sends
/// succeeded; a failed recipient never stops the pass.
async fn notify_all_subscribers(
    channel: &dyn ChannelAdapter,
    storage: &Arc<dyn Storage>,
    text: &str,
) -> usize {
    let subscribers = match call_blocking(storage.clone(), |s| s.list_subscribers()).await {
        Ok(ids) => ids,
        Err(e) => {
            error!("Failed to list subscribers for boot notification: {e}");
            return 0;
        }
    };

    let mut delivered = 0;
    for subscriber in subscribers {
        debug!(subscriber, "Notifying subscriber on start");
        match channel.send_text(subscriber, text, None).await {
            Ok(()) => delivered += 1,
            Err(e) => error!(subscriber, "Failed to send boot notification: {e}"),
        }
    }
    delivered
}

async fn record_alive(storage: &Arc<dyn Storage>) {
    debug!("Bot is alive");
    if let Err(e) = call_blocking(storage.clone(), |s| s.record_event(ALIVE_EVENT, ALIVE_EVENT)).await
    {
        error!("Failed to store liveness event: {e}");
    }
}

async fn handle_update(ctx: &LoopContext, update: Update) {
    let Some(message) = update.message else {
        return;
    };
    let Some(text) = message.command(ctx.bot_username.as_deref()) else {
        debug!(chat_id = message.chat_id, "Ignoring non-command message");
        return;
    };
    let command = BotCommand::parse(text.name);

    info!(
        chat_id = message.chat_id,
        sender_id = message.sender.as_ref().map(|s| s.id),
        ?command,
        args = text.args,
        "Got a new command"
    );
    let reply = handle_chat_command(&ctx.commands, &message, command).await;
    if let Err(e) = ctx
        .channel
        .send_text(message.chat_id, &reply, Some(message.message_id))
        .await
    {
        error!(chat_id = message.chat_id, "Failed to send reply: {e}");
    }
}

async fn run_event_loop(ctx: LoopContext, mut updates: UpdateReceiver, cancel: CancellationToken) {
    info!(
        last_shutdown = %format_local(ctx.commands.last_shutdown, ctx.commands.timezone),
        "Bot has been started"
    );
    record_alive(&ctx.commands.storage).await;

    let period = ctx.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut updates_open = true;

    loop {
        tokio::select! {
            // Cancellation wins over anything else that is ready.
            biased;
            _ = cancel.cancelled() => {
                info!("Stopping bot");
                return;
            }
            _ = ticker.tick() => record_alive(&ctx.commands.storage).await,
            update = updates.recv(), if updates_open => match update {
                Some(update) => handle_update(&ctx, update).await,
                None => {
                    warn!("Update stream closed");
                    updates_open = false;
                }
            },
        }
    }
}
