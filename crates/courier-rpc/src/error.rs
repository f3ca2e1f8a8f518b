//! RPC error types.

use crate::correlation::CorrelationId;
use crate::response::ResponseStatus;
use courier_transport::{CodecError, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the caller of a single RPC.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The request payload could not be encoded; nothing was published.
    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The callee answered with a non-OK status.
    #[error("{status}: {exception_name}\n{exception_msg}")]
    Remote {
        status: ResponseStatus,
        exception_name: String,
        exception_msg: String,
    },

    /// A reply arrived for this call but its body was not a JSON object.
    #[error("invalid response for {id}: {reason}")]
    InvalidResponse { id: CorrelationId, reason: String },

    #[error("request {id} timed out after {after:?}")]
    Timeout { id: CorrelationId, after: Duration },

    /// The pending call was dropped without being resolved.
    #[error("request {0} abandoned before a response arrived")]
    Abandoned(CorrelationId),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RpcError {
    /// True for errors reported by the remote side.
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote { .. })
    }
}

/// Correlation registry errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("correlation id {0} is already registered")]
    Duplicate(CorrelationId),
}
