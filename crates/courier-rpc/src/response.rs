//! Response envelope and status codes.

use crate::correlation::CorrelationId;
use crate::error::RpcError;
use courier_transport::{MapMessage, MessageProperties, STATUS_HEADER};
use serde_json::Value;
use std::fmt;

/// Body key naming the remote error kind.
pub const EXCEPTION_NAME_KEY: &str = "exceptionName";

/// Body key carrying the human-readable remote error message.
pub const EXCEPTION_MSG_KEY: &str = "exceptionMsg";

/// Outcome category reported by the callee in the `status` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Ok,
    /// The request body could not be decoded by the callee
    MalformedRequest,
    /// The request decoded but was rejected
    InvalidRequest,
    /// The callee refused to process the request
    Nack,
    /// The handler failed while processing
    InternalError,
    /// A status this client does not know; treated as a failure
    Unknown(String),
}

impl ResponseStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::MalformedRequest => "MALFORMED_REQUEST",
            ResponseStatus::InvalidRequest => "INVALID_REQUEST",
            ResponseStatus::Nack => "NACK",
            ResponseStatus::InternalError => "INTERNAL_ERROR",
            ResponseStatus::Unknown(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "OK" => ResponseStatus::Ok,
            "MALFORMED_REQUEST" => ResponseStatus::MalformedRequest,
            "INVALID_REQUEST" => ResponseStatus::InvalidRequest,
            "NACK" => ResponseStatus::Nack,
            "INTERNAL_ERROR" => ResponseStatus::InternalError,
            other => ResponseStatus::Unknown(other.to_string()),
        }
    }

    /// Status from the `status` header; a missing header means OK.
    pub fn from_properties(properties: &MessageProperties) -> Self {
        match properties.header(STATUS_HEADER) {
            None => ResponseStatus::Ok,
            Some(Value::String(s)) => Self::parse(s),
            Some(other) => ResponseStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == ResponseStatus::Ok
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Properties a responder should attach to a reply.
pub fn reply_properties(correlation_id: &str, status: &ResponseStatus) -> MessageProperties {
    MessageProperties::json()
        .with_correlation_id(correlation_id)
        .with_header(STATUS_HEADER, Value::String(status.as_str().to_string()))
}

/// A reply matched to its request.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub correlation_id: CorrelationId,
    pub status: ResponseStatus,
    pub properties: MessageProperties,
    pub body: MapMessage,
}

impl RpcResponse {
    pub fn new(
        correlation_id: CorrelationId,
        properties: MessageProperties,
        body: MapMessage,
    ) -> Self {
        Self {
            correlation_id,
            status: ResponseStatus::from_properties(&properties),
            properties,
            body,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn exception_name(&self) -> Option<&str> {
        self.body.get(EXCEPTION_NAME_KEY).and_then(Value::as_str)
    }

    pub fn exception_msg(&self) -> Option<&str> {
        self.body.get(EXCEPTION_MSG_KEY).and_then(Value::as_str)
    }

    /// `Ok(self)` for an OK status, otherwise the remote error it describes.
    pub fn into_result(self) -> Result<RpcResponse, RpcError> {
        if self.is_ok() {
            return Ok(self);
        }

        Err(RpcError::Remote {
            exception_name: self.exception_name().unwrap_or("null").to_string(),
            exception_msg: self.exception_msg().unwrap_or("null").to_string(),
            status: self.status,
        })
    }
}
