//! # Courier Transport - Broker Capability for RPC and Workers
//!
//! Everything the RPC client and the reconnecting worker need from a message
//! broker, expressed as traits, plus one in-process implementation.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────┐  connect()   ┌──────────────┐  create_channel()  ┌──────────────┐
//! │  Connector   │ ───────────► │  Connection  │ ─────────────────► │   Channel    │
//! └──────────────┘              └──────┬───────┘                    └──────┬───────┘
//!                                      │ shutdown                          │ consume()
//!                                      ▼                                   ▼
//!                             ShutdownListener                      MessageConsumer
//!                                                                          │
//!                                                                          ▼
//!                                                                   MessageHandler
//! ```
//!
//! ## Modules
//!
//! - [`connection`]: `Connector`, `Connection`, `Channel`, shutdown notification
//! - [`message`]: routes, queue options, message properties, deliveries
//! - [`codec`]: JSON encoding of message bodies
//! - [`consumer`]: the generic consume loop driving a `MessageHandler`
//! - [`memory`]: in-process broker implementing the capability

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod codec;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;

pub use codec::{decode, encode, MapMessage};
pub use connection::{
    Channel, ChannelId, Connection, ConnectionId, Connector, DeliveryStream, ShutdownListener,
    ShutdownSignal,
};
pub use consumer::{ConsumerHandle, MessageConsumer, MessageHandler};
pub use error::{CodecError, TransportError};
pub use memory::{InMemoryBroker, InMemoryChannel, InMemoryConnection, InMemoryConnector};
pub use message::{Delivery, MessageProperties, QueueOptions, Route};

/// Name of the default exchange, which routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// Header carrying the response status of an RPC reply.
pub const STATUS_HEADER: &str = "status";

/// Content type stamped on every JSON-encoded body.
pub const JSON_CONTENT_TYPE: &str = "application/json";
