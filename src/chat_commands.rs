use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::error;

use crate::channel::IncomingMessage;
use crate::db::call_blocking;
use crate::store::{Storage, Subscriber};
use crate::time::format_local;

pub const ALREADY_REGISTERED: &str = "You're already registered";
pub const REGISTERED: &str = "You've been successfully registered";
pub const REGISTER_FAILED: &str = "Failed to register you. Please try again later";
pub const UNREGISTERED: &str = "You've been successfully unregistered";
pub const UNREGISTER_FAILED: &str = "Failed to unregister you. Please try again later";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Stop,
    LastShutdown,
    Help,
}

impl BotCommand {
    /// Anything unrecognized falls back to `Help`.
    pub fn parse(name: &str) -> BotCommand {
        match name {
            "start" => BotCommand::Start,
            "stop" => BotCommand::Stop,
            "lastshutdown" => BotCommand::LastShutdown,
            _ => BotCommand::Help,
        }
    }
}

/// What command handlers need besides the message itself.
#[derive(Clone)]
pub struct CommandContext {
    pub storage: Arc<dyn Storage>,
    pub last_shutdown: DateTime<Utc>,
    pub timezone: Option<Tz>,
}

pub fn help_text() -> String {
    "Type /start to get started\n\
     Type /stop to stop receiving notifications\n\
     Type /lastshutdown to get the last shutdown time"
        .to_string()
}

pub fn last_shutdown_text(last_shutdown: DateTime<Utc>, tz: Option<Tz>) -> String {
    format!("Last shutdown time is {}", format_local(last_shutdown, tz))
}

pub fn boot_greeting(
    launch_time: DateTime<Utc>,
    last_alive: DateTime<Utc>,
    tz: Option<Tz>,
) -> String {
    format!(
        "Bot started at {}\nLast alive time: {}",
        format_local(launch_time, tz),
        format_local(last_alive, tz)
    )
}

/// The subscriber is keyed by the chat the command came from; profile fields
/// come from the sender when the platform provides one.
fn subscriber_from_message(msg: &IncomingMessage) -> Subscriber {
    let mut subscriber = Subscriber::new(msg.chat_id);
    if let Some(sender) = &msg.sender {
        subscriber.handle = sender.username.clone();
        subscriber.given_name = sender.first_name.clone();
        subscriber.family_name = sender.last_name.clone();
    }
    subscriber
}

async fn handle_start(ctx: &CommandContext, msg: &IncomingMessage) -> String {
    let identity = msg.chat_id;
    let exists =
        match call_blocking(ctx.storage.clone(), move |s| Ok(s.subscriber_exists(identity))).await
        {
            Ok(exists) => exists,
            Err(e) => {
                error!(identity, "Failed to check subscriber registration: {e}");
                false
            }
        };
    if exists {
        return ALREADY_REGISTERED.to_string();
    }

    let subscriber = subscriber_from_message(msg);
    match call_blocking(ctx.storage.clone(), move |s| s.insert_subscriber(&subscriber)).await {
        Ok(()) => REGISTERED.to_string(),
        Err(e) => {
            error!(identity, "Failed to store subscriber: {e}");
            REGISTER_FAILED.to_string()
        }
    }
}

async fn handle_stop(ctx: &CommandContext, msg: &IncomingMessage) -> String {
    let identity = msg.chat_id;
    match call_blocking(ctx.storage.clone(), move |s| s.remove_subscriber(identity)).await {
        Ok(()) => UNREGISTERED.to_string(),
        Err(e) => {
            error!(identity, "Failed to remove subscriber: {e}");
            UNREGISTER_FAILED.to_string()
        }
    }
}

pub async fn handle_chat_command(
    ctx: &CommandContext,
    msg: &IncomingMessage,
    command: BotCommand,
) -> String {
    match command {
        BotCommand::Start => handle_start(ctx, msg).await,
        BotCommand::Stop => handle_stop(ctx, msg).await,
        BotCommand::LastShutdown => last_shutdown_text(ctx.last_shutdown, ctx.timezone),
        BotCommand::Help => help_text(),
    }
}
