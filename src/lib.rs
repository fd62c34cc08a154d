pub mod bot;
pub mod channels;
pub mod chat_commands;
pub mod config;
pub mod runtime;

pub use channels::telegram;
pub use electrobot_app::logging;
pub use electrobot_channels::channel;
pub use electrobot_channels::channel_adapter;
pub use electrobot_core::error;
pub use electrobot_core::time;
pub use electrobot_storage::db;
pub use electrobot_storage::store;
