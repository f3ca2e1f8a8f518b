//! # Transport Capability
//!
//! The broker surface consumed by the RPC client and the message worker.
//! Implementations own connection establishment and topology; callers only
//! see connections, channels and shutdown notifications.

use crate::error::TransportError;
use crate::message::{Delivery, MessageProperties, QueueOptions, Route};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier of a broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifier of a channel; never reused within a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan-{}", self.0)
    }
}

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSignal {
    pub connection_id: ConnectionId,
    pub reason: String,
    /// True when the application closed the connection itself
    pub initiated_by_application: bool,
}

/// Observer notified once when a connection shuts down.
pub trait ShutdownListener: Send + Sync {
    fn shutdown_completed(&self, signal: ShutdownSignal);
}

/// Source of fresh broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Connection>, TransportError>;
}

/// A live broker connection.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn is_open(&self) -> bool;

    /// Open a new channel on this connection.
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, TransportError>;

    /// Register a shutdown observer.
    ///
    /// Registering on an already closed connection notifies the listener
    /// immediately.
    fn add_shutdown_listener(&self, listener: Arc<dyn ShutdownListener>);
}

/// A channel: the unit that publishes and consumes.
#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;

    fn is_open(&self) -> bool;

    /// Declare a queue, returning its name.
    ///
    /// `None` asks the broker to generate a unique name.
    async fn declare_queue(
        &self,
        name: Option<&str>,
        options: &QueueOptions,
    ) -> Result<String, TransportError>;

    /// Bind a queue to a non-default exchange under the route's key.
    async fn bind_queue(&self, queue: &str, route: &Route) -> Result<(), TransportError>;

    async fn publish(
        &self,
        route: &Route,
        body: Bytes,
        properties: MessageProperties,
    ) -> Result<(), TransportError>;

    /// Start consuming a queue.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError>;
}

/// Stream of deliveries for one consumer.
///
/// Ends when the consumer is cancelled by the broker, e.g. because its
/// channel closed. Dropping the stream cancels the consumer.
pub struct DeliveryStream {
    receiver: mpsc::UnboundedReceiver<Delivery>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl DeliveryStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            receiver,
            on_drop: None,
        }
    }

    /// Stream that runs `release` when dropped.
    pub fn with_release(
        receiver: mpsc::UnboundedReceiver<Delivery>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            on_drop: Some(Box::new(release)),
        }
    }

    /// Next delivery, or `None` once the consumer has been cancelled.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        if let Some(release) = self.on_drop.take() {
            release();
        }
    }
}

impl fmt::Debug for DeliveryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryStream").finish_non_exhaustive()
    }
}
