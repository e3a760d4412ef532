//! Recoverable errors reported by the state tracker.
//!
//! None of these stop the daemon. The dispatch loop logs them and moves on
//! to the next event.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The event did not carry an attribute its action needs.
    #[error("{action} event is missing the '{attribute}' attribute")]
    MissingAttribute {
        action: &'static str,
        attribute: &'static str,
    },

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("container {container} is already connected to network {network}")]
    DuplicateEndpoint { container: String, network: String },

    #[error("container {container} has no endpoint on network {network}")]
    UnknownEndpoint { container: String, network: String },

    /// Inspection says the container is not attached to the network.
    #[error("container {container} is not attached to network {network}")]
    NotAttached { container: String, network: String },

    #[error("could not inspect container {container}: {reason}")]
    Inspect { container: String, reason: String },

    /// Container names from the API are expected to start with '/'.
    #[error("malformed container name: {0:?}")]
    InvalidContainerName(String),

    #[error("unhandled network event action: {0:?}")]
    UnhandledEvent(String),
}
