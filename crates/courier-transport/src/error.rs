//! Transport and codec errors.

use thiserror::Error;

/// Errors raised by a broker transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker refused or could not accept a new connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The connection has been shut down.
    #[error("connection closed")]
    ConnectionClosed,

    /// The channel has been closed, usually because its connection went away.
    #[error("channel closed")]
    ChannelClosed,

    /// The queue does not exist on the broker.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Any other broker-side failure.
    #[error("broker error: {0}")]
    Broker(String),
}

/// Errors from encoding or decoding a message body.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be serialized to JSON.
    #[error("failed to encode message body: {0}")]
    Encode(#[source] serde_json::Error),

    /// The bytes are not valid JSON for the expected type.
    #[error("failed to decode message body: {0}")]
    Decode(#[source] serde_json::Error),
}
