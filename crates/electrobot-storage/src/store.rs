use chrono::{DateTime, Utc};

use electrobot_core::error::ElectroBotError;

/// Name of the event the bot refreshes on every liveness tick.
pub const ALIVE_EVENT: &str = "Bot is alive";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub identity: i64,
    pub handle: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

impl Subscriber {
    pub fn new(identity: i64) -> Self {
        Subscriber {
            identity,
            handle: None,
            given_name: None,
            family_name: None,
        }
    }
}

/// Capability set the bot needs from persistent storage.
///
/// Every call is a single independently committed statement. Implementations
/// return faults as values; only `subscriber_exists` swallows them (logging
/// and answering `false`) because its callers treat the answer as advisory.
pub trait Storage: Send + Sync {
    /// Fails with `ConstraintViolation` if the identity is already registered.
    fn insert_subscriber(&self, subscriber: &Subscriber) -> Result<(), ElectroBotError>;

    fn subscriber_exists(&self, identity: i64) -> bool;

    /// Removing an unknown identity is not an error.
    fn remove_subscriber(&self, identity: i64) -> Result<(), ElectroBotError>;

    fn list_subscribers(&self) -> Result<Vec<i64>, ElectroBotError>;

    /// Refreshes the rows named `name`, inserting one only if none matched.
    fn record_event(&self, name: &str, description: &str) -> Result<(), ElectroBotError>;

    /// Fails with `NotFound` if nothing named `name` was ever recorded.
    fn latest_event_time(&self, name: &str) -> Result<DateTime<Utc>, ElectroBotError>;
}
