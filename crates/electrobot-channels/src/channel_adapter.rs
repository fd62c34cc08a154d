use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::Update;

/// Capacity of the queue between a platform's update listener and the bot loop.
pub const UPDATE_QUEUE_CAPACITY: usize = 64;

pub type UpdateReceiver = mpsc::Receiver<Update>;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique name: "telegram"
    fn name(&self) -> &str;

    /// Verifies the credentials with the platform and returns the bot username.
    async fn authenticate(&self) -> Result<String, String>;

    /// Starts listening for updates. The receiver closes once `stop_updates` ran.
    async fn start_updates(&self) -> Result<UpdateReceiver, String>;

    /// Stops the update listener. Safe to call more than once.
    async fn stop_updates(&self);

    /// Send text to a chat, optionally as a threaded reply to `reply_to`.
    async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i32>)
        -> Result<(), String>;
}
