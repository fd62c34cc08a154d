//! Shared error taxonomy and time helpers for electrobot.

pub mod error;
pub mod time;
