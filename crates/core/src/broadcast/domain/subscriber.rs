use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Identity of one joined subscriber. Never reused within a hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber is closed")]
    Closed,
    #[error("subscriber queue is full")]
    Backpressure,
    #[error("delivery failed: {0}")]
    Failed(String),
}

impl DeliveryError {
    /// Whether the hub should drop the subscriber after this failure.
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, DeliveryError::Backpressure)
    }
}

/// Output channel to one connected viewer.
///
/// `deliver` must return promptly: a slow viewer reports
/// [`DeliveryError::Backpressure`] instead of blocking the publisher.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, frame: &Arc<[u8]>) -> Result<(), DeliveryError>;

    fn is_open(&self) -> bool {
        true
    }
}
