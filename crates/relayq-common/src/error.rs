//! Request-scoped errors surfaced by queue operations.

use thiserror::Error;

/// Errors a queue operation reports back to its caller.
///
/// Replication failures never appear here: peer unavailability is
/// logged by the coordinator and never reaches a caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Push of a key already present in the queue
    #[error("Duplicate key in queue")]
    KeyExists(String),

    /// Pull on an empty queue
    #[error("Queue is empty")]
    EmptyQueue,

    /// Delete of a key not present in the queue
    #[error("Key not found")]
    KeyNotFound(String),

    /// Snapshot payload could not be decoded
    #[error("Can not parse input data")]
    ParseData(String),

    /// No peer produced a snapshot during bootstrap
    #[error("Cant get any queue from other nodes")]
    QueueNotFound,

    /// No live member carries the primary role
    #[error("Primary node not found")]
    PrimaryNotFound,

    /// Identity is already registered as a subscriber
    #[error("You already subscribed")]
    AlreadySubscribed(String),

    /// Dispatch with an empty subscriber registry
    #[error("No subscribers")]
    NoSubscribers,

    /// The chosen subscriber's channel is gone
    #[error("Delivery to subscriber {0} failed")]
    DeliveryFailed(String),
}

impl QueueError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::KeyExists(_) => 409,
            Self::EmptyQueue => 404,
            Self::KeyNotFound(_) => 404,
            Self::ParseData(_) => 400,
            Self::QueueNotFound => 404,
            Self::PrimaryNotFound => 503,
            Self::AlreadySubscribed(_) => 409,
            Self::NoSubscribers => 503,
            Self::DeliveryFailed(_) => 502,
        }
    }
}
