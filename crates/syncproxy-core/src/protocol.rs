//! Wire protocol between two hubs
//!
//! Messages are serialized with postcard and handed to a [`PeerLink`](crate::PeerLink)
//! already framed. There are no sequence numbers; ordering relies on the
//! transport delivering frames in order.
//!
//! ## Message Flow
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |--- InitRequest {Settings, core} ------>|
//!   |<-- InitData {Settings, core, props} ---|
//!   |                                        |
//!   |--- Sync {requestSetVolume, [7]} ------>|   (server-bound)
//!   |<-- Sync {receiveSetVolume, [7, ok]} ---|   (return value pairing)
//!   |<-- Sync {setVolume, [7]} --------------|   (client-bound)
//!   |                                        |
//!   |<-- RpcCall {valueChanged(int), [7]} ---|   (relayed event)
//! ```

use serde::{Deserialize, Serialize};

use crate::value::{PropertyMap, Value};

/// Messages exchanged between hubs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    /// A relayed event, delivered to every receiver attached under `wire_name`
    RpcCall {
        /// Normalized signature or custom wire name
        wire_name: String,
        /// Event arguments
        args: Vec<Value>,
    },

    /// A method call on a specific synchronized object
    Sync {
        class_name: String,
        instance_name: String,
        /// Method name without parameter list
        method_name: String,
        args: Vec<Value>,
    },

    /// Ask the peer for an object's full state
    InitRequest {
        class_name: String,
        instance_name: String,
    },

    /// Full object state, answer to [`ProtocolMessage::InitRequest`]
    InitData {
        class_name: String,
        instance_name: String,
        properties: PropertyMap,
    },
}

impl ProtocolMessage {
    /// Encode message to bytes using postcard
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode message from bytes using postcard
    pub fn decode(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }

    /// Target object of the message, `None` for RPC calls
    pub fn target(&self) -> Option<(&str, &str)> {
        match self {
            ProtocolMessage::RpcCall { .. } => None,
            ProtocolMessage::Sync {
                class_name,
                instance_name,
                ..
            }
            | ProtocolMessage::InitRequest {
                class_name,
                instance_name,
            }
            | ProtocolMessage::InitData {
                class_name,
                instance_name,
                ..
            } => Some((class_name, instance_name)),
        }
    }

    /// Short label used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolMessage::RpcCall { .. } => "rpc_call",
            ProtocolMessage::Sync { .. } => "sync",
            ProtocolMessage::InitRequest { .. } => "init_request",
            ProtocolMessage::InitData { .. } => "init_data",
        }
    }

    pub fn is_rpc_call(&self) -> bool {
        matches!(self, ProtocolMessage::RpcCall { .. })
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, ProtocolMessage::Sync { .. })
    }

    pub fn is_init_request(&self) -> bool {
        matches!(self, ProtocolMessage::InitRequest { .. })
    }

    pub fn is_init_data(&self) -> bool {
        matches!(self, ProtocolMessage::InitData { .. })
    }
}
