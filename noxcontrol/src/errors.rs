//! Control-side error taxonomy.

use thiserror::Error;

/// Errors surfaced by the control point.
///
/// Transport errors within a single action invocation are recovered by
/// endpoint failover; across invocations there is no automatic retry.
/// Subscription faults are not retried in place: a new subscription is
/// established.
#[derive(Error, Debug)]
pub enum ControlError {
    /// A peer message failed local decoding
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Fatal configuration problem at initialization
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A device description could not be fetched or understood
    #[error("Invalid description: {0}")]
    InvalidDescription(String),

    /// Socket-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// An operation exceeded its deadline
    #[error("Operation timed out")]
    Timeout,

    /// The device answered with a UPnP fault
    #[error("Remote fault {code}: {description}")]
    RemoteFault { code: u32, description: String },

    /// SEQ gap or publisher-terminated subscription
    #[error("Subscription lost: {0}")]
    SubscriptionLost(String),

    /// Input arguments rejected before anything touched the wire
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}
