//! Process-level plumbing for electrobot.

pub mod logging;
