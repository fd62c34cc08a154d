use async_trait::async_trait;
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ReplyParameters, UpdateKind};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use electrobot_channels::channel::{IncomingMessage, Sender, Update as ChatUpdate};
use electrobot_channels::channel_adapter::{
    ChannelAdapter, UpdateReceiver, UPDATE_QUEUE_CAPACITY,
};

struct Listener {
    shutdown: ShutdownToken,
    task: JoinHandle<()>,
}

pub struct TelegramAdapter {
    name: String,
    bot: Bot,
    listener: Mutex<Option<Listener>>,
}

impl TelegramAdapter {
    pub fn new(name: String, bot: Bot) -> Self {
        TelegramAdapter {
            name,
            bot,
            listener: Mutex::new(None),
        }
    }
}

/// Only freshly posted messages carry a message; edits, callbacks and the
/// rest arrive as empty updates.
fn to_chat_update(update: &Update) -> ChatUpdate {
    let message = match &update.kind {
        UpdateKind::Message(msg) => Some(to_incoming_message(msg)),
        _ => None,
    };
    ChatUpdate { message }
}

fn to_incoming_message(msg: &Message) -> IncomingMessage {
    IncomingMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        text: msg.text().map(str::to_string),
        sender: msg.from.as_ref().map(|user| Sender {
            id: user.id.0 as i64,
            username: user.username.clone(),
            first_name: Some(user.first_name.clone()),
            last_name: user.last_name.clone(),
        }),
    }
}

async fn forward_update(
    update: Update,
    tx: mpsc::Sender<ChatUpdate>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if tx.send(to_chat_update(&update)).await.is_err() {
        debug!(update_id = update.id.0, "Dropping Telegram update, bot loop is gone");
    }
    Ok(())
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self) -> Result<String, String> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| format!("Telegram authentication failed: {e}"))?;
        Ok(me.user.username.clone().unwrap_or_default())
    }

    async fn start_updates(&self) -> Result<UpdateReceiver, String> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Err("Telegram update listener is already running".into());
        }

        let (tx, rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
        let handler = dptree::entry().endpoint(forward_update);
        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .default_handler(|_| async {})
            .dependencies(dptree::deps![tx])
            .build();
        let shutdown = dispatcher.shutdown_token();
        let task = tokio::spawn(async move {
            dispatcher.dispatch().await;
            info!("Telegram update listener stopped");
        });

        *listener = Some(Listener { shutdown, task });
        Ok(rx)
    }

    async fn stop_updates(&self) {
        let Some(listener) = self.listener.lock().await.take() else {
            return;
        };
        let Listener { shutdown, task } = listener;
        let result = shutdown.shutdown();
        match result {
            Ok(done) => {
                done.await;
                let _ = task.await;
            }
            Err(e) => {
                // Dispatcher never got going; nothing to drain.
                warn!("Telegram listener was idle at shutdown: {e}");
                task.abort();
            }
        };
    }

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
    ) -> Result<(), String> {
        let mut req = self.bot.send_message(ChatId(chat_id), text);
        if let Some(message_id) = reply_to {
            req = req.reply_parameters(ReplyParameters::new(MessageId(message_id)));
        }
        req.await
            .map(|_| ())
            .map_err(|e| format!("Failed to send Telegram message to {chat_id}: {e}"))
    }
}
