//! Worker error types.

use crate::worker::WorkerState;
use courier_transport::{CodecError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),

    /// No live subscription to publish through.
    #[error("transport unavailable while worker is {0}")]
    TransportUnavailable(WorkerState),

    #[error("invalid configuration: {0}")]
    Config(String),
}
