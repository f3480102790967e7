//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug)]
pub enum TrellisError {
    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),

    /// A policy name that no creator is registered for.
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    /// A component received a message it cannot handle in its current state.
    #[error("{component} received an unexpected message: {tag}")]
    UnexpectedMessage {
        /// Name of the receiving component.
        component: String,
        /// Tag of the offending message.
        tag: String,
    },

    /// Destination is not connected to the fabric.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// A component tried to join the fabric under a name already in use.
    #[error("Peer name already in use: {0}")]
    DuplicatePeer(String),

    /// The other end of a channel went away.
    #[error("Peer disconnected: {0}")]
    Disconnected(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The allocator was asked to distribute policies over zero slots.
    #[error("Cannot allocate policies to zero slots")]
    NoSlots,

    /// Failed to encode or decode a serialized policy state.
    #[error("Policy state codec error: {0}")]
    StateCodec(String),
}
