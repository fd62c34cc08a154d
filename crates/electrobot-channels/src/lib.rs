//! Platform-neutral chat types and the adapter seam the bot talks through.

pub mod channel;
pub mod channel_adapter;
