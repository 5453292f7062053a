//! Error types for the synchronization layer

use thiserror::Error;

use crate::hub::ProxyMode;
use crate::value::TypeTag;

/// Main error type for synchronization and RPC operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// No object registered under this class/instance pair
    #[error("Unknown object: {class}/{instance}")]
    UnknownObject {
        /// Class name from the message
        class: String,
        /// Instance name from the message
        instance: String,
    },

    /// The class catalog has no method with this name
    #[error("Unknown method: {class}::{method}")]
    UnknownMethod {
        /// Class the lookup ran against
        class: String,
        /// Normalized method name
        method: String,
    },

    /// The class catalog declares no event with this name
    #[error("Unknown event: {class}::{event}")]
    UnknownEvent {
        /// Class the lookup ran against
        class: String,
        /// Event name
        event: String,
    },

    /// A method was invoked on an endpoint whose mode does not match its direction
    #[error("Method {method} is {expected}-bound but this hub runs in {actual} mode")]
    WrongMode {
        /// Method name
        method: String,
        /// Direction declared by the catalog
        expected: ProxyMode,
        /// Mode of the hub
        actual: ProxyMode,
    },

    /// Fewer arguments than the method's minimum
    #[error("Not enough arguments for {method}: need {required}, got {supplied}")]
    InsufficientArguments {
        /// Method name
        method: String,
        /// Minimum required count
        required: usize,
        /// Count received
        supplied: usize,
    },

    /// An argument value carried no type
    #[error("Invalid value for argument {index} of {method}")]
    InvalidArgument {
        /// Method name
        method: String,
        /// Zero-based argument position
        index: usize,
    },

    /// An argument's runtime type does not match the declared type
    #[error("Argument {index} of {method} must be {expected}, got {actual}")]
    ArgumentTypeMismatch {
        /// Method name
        method: String,
        /// Zero-based argument position
        index: usize,
        /// Declared type
        expected: TypeTag,
        /// Type of the received value
        actual: TypeTag,
    },

    /// A declared argument type cannot cross the wire
    #[error("Argument {index} of {name} has an unregistered type")]
    UnregisteredType {
        /// Method or event name
        name: String,
        /// Zero-based argument position
        index: usize,
    },

    /// Operation exists conceptually but is not supported by this layer
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Peer link is not open
    #[error("Peer is not open")]
    PeerClosed,

    /// Client mode allows a single peer
    #[error("Only one peer allowed in client mode")]
    PeerLimitReached,

    /// Peer id is not attached to this hub
    #[error("Unknown peer: {0}")]
    UnknownPeer(u64),

    /// Hub has no peers
    #[error("No peers in use")]
    NoPeers,

    /// Mode cannot change while peers are attached
    #[error("Cannot change mode while connected")]
    ModeLocked,

    /// Target object is already mutably borrowed
    #[error("Object is busy: {0}")]
    ObjectBusy(String),

    /// Target object has been dropped by the application
    #[error("Object dropped: {0}")]
    ObjectDropped(String),

    /// Handler could not be applied to the receiver
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<postcard::Error> for SyncError {
    fn from(err: postcard::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
