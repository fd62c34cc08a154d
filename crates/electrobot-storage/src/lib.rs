//! Subscriber registry and event ledger for electrobot.

pub mod db;
pub mod store;
