//! Message metadata: routes, queue options, properties and deliveries.

use crate::codec::MapMessage;
use crate::{DEFAULT_EXCHANGE, JSON_CONTENT_TYPE};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a message is published: an exchange plus a routing key.
///
/// On the default exchange the routing key is the destination queue name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub exchange: String,
    pub routing_key: String,
}

impl Route {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Route straight to a named queue through the default exchange.
    pub fn queue(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_EXCHANGE, name)
    }

    pub fn is_default_exchange(&self) -> bool {
        self.exchange == DEFAULT_EXCHANGE
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default_exchange() {
            write!(f, "{}", self.routing_key)
        } else {
            write!(f, "{}/{}", self.exchange, self.routing_key)
        }
    }
}

/// Queue declaration options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Survive broker restarts
    pub durable: bool,
    /// Only usable by the declaring connection
    pub exclusive: bool,
    /// Deleted once its last consumer goes away
    pub auto_delete: bool,
    /// Broker-specific queue arguments
    pub arguments: MapMessage,
}

impl QueueOptions {
    /// Options for a private, server-named reply queue.
    pub fn reply_queue() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
            arguments: MapMessage::new(),
        }
    }

    pub fn durable() -> Self {
        Self {
            durable: true,
            ..Self::default()
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }
}

/// Metadata travelling alongside a message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageProperties {
    /// Links a reply to the request that caused it
    pub correlation_id: Option<String>,
    /// Queue the callee should publish its reply to
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, serde_json::Value>,
}

impl MessageProperties {
    /// Properties for a JSON body.
    pub fn json() -> Self {
        Self {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            ..Self::default()
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    pub fn header(&self, key: &str) -> Option<&serde_json::Value> {
        self.headers.get(key)
    }

    /// String-valued header, `None` when absent or not a string.
    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.header(key).and_then(|v| v.as_str())
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Per-queue sequence number assigned by the broker
    pub delivery_tag: u64,
    /// Queue the message was delivered from
    pub queue: String,
    pub properties: MessageProperties,
    pub body: Bytes,
}
