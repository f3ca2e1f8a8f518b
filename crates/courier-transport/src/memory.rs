//! # In-Memory Broker
//!
//! In-process implementation of the transport capability.
//!
//! Routing follows the usual broker model, reduced to what RPC and workers
//! need:
//!
//! - the default exchange (`""`) routes to the queue named by the routing key
//! - any other exchange routes through explicit `(exchange, key) -> queue` bindings
//! - each queue delivers round-robin to its consumers and buffers while it has none
//! - unroutable messages are dropped
//!
//! Connections can be shut down on demand ([`InMemoryConnection::fail`]) to
//! exercise reconnect paths, and the connector can be told to refuse the next
//! few connection attempts.

use crate::connection::{
    Channel, ChannelId, Connection, ConnectionId, Connector, DeliveryStream, ShutdownListener,
    ShutdownSignal,
};
use crate::error::TransportError;
use crate::message::{Delivery, MessageProperties, QueueOptions, Route};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

type ConsumerId = u64;

struct QueueState {
    options: QueueOptions,
    consumers: Vec<(ConsumerId, mpsc::UnboundedSender<Delivery>)>,
    next_consumer: usize,
    backlog: VecDeque<Delivery>,
    next_tag: u64,
}

impl QueueState {
    fn new(options: QueueOptions) -> Self {
        Self {
            options,
            consumers: Vec::new(),
            next_consumer: 0,
            backlog: VecDeque::new(),
            next_tag: 0,
        }
    }

    /// Hand a delivery to the next live consumer, or buffer it.
    fn dispatch(&mut self, mut delivery: Delivery) {
        while !self.consumers.is_empty() {
            let idx = self.next_consumer % self.consumers.len();
            match self.consumers[idx].1.send(delivery) {
                Ok(()) => {
                    self.next_consumer = idx + 1;
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    // Receiver is gone without having been cancelled yet.
                    self.consumers.remove(idx);
                    delivery = returned;
                }
            }
        }
        self.backlog.push_back(delivery);
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    bindings: HashMap<Route, Vec<String>>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    next_id: AtomicU64,
    published: AtomicU64,
}

/// Shared broker state. Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Declare a queue; redeclaring an existing queue keeps it as is.
    pub fn declare_queue(&self, name: Option<&str>, options: &QueueOptions) -> String {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("amq.gen-{}", Uuid::new_v4().simple()),
        };

        let mut state = self.inner.state.lock();
        state
            .queues
            .entry(name.clone())
            .or_insert_with(|| QueueState::new(options.clone()));

        debug!(queue = %name, "Queue declared");
        name
    }

    pub fn bind_queue(&self, queue: &str, route: &Route) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(TransportError::QueueNotFound(queue.to_string()));
        }

        let bound = state.bindings.entry(route.clone()).or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        debug!(queue = queue, route = %route, "Queue bound");
        Ok(())
    }

    /// Route a message to its queues. Returns how many queues received it.
    pub fn publish(&self, route: &Route, body: Bytes, properties: MessageProperties) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let mut state = self.inner.state.lock();

        let targets: Vec<String> = if route.is_default_exchange() {
            if state.queues.contains_key(&route.routing_key) {
                vec![route.routing_key.clone()]
            } else {
                Vec::new()
            }
        } else {
            state.bindings.get(route).cloned().unwrap_or_default()
        };

        let mut routed = 0;
        for name in &targets {
            let Some(queue) = state.queues.get_mut(name) else {
                continue;
            };
            queue.next_tag += 1;
            queue.dispatch(Delivery {
                delivery_tag: queue.next_tag,
                queue: name.clone(),
                properties: properties.clone(),
                body: body.clone(),
            });
            routed += 1;
        }

        if routed == 0 {
            warn!(route = %route, "Message dropped (unroutable)");
        }
        routed
    }

    fn register_consumer(
        &self,
        queue: &str,
    ) -> Result<(ConsumerId, DeliveryStream), TransportError> {
        let id = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut state = self.inner.state.lock();
            let Some(q) = state.queues.get_mut(queue) else {
                return Err(TransportError::QueueNotFound(queue.to_string()));
            };
            q.consumers.push((id, tx));
            for delivery in std::mem::take(&mut q.backlog) {
                q.dispatch(delivery);
            }
        }

        let broker: Weak<BrokerInner> = Arc::downgrade(&self.inner);
        let queue_name = queue.to_string();
        let stream = DeliveryStream::with_release(rx, move || {
            if let Some(inner) = broker.upgrade() {
                InMemoryBroker { inner }.cancel_consumer(&queue_name, id);
            }
        });

        debug!(queue = queue, consumer = id, "Consumer registered");
        Ok((id, stream))
    }

    fn cancel_consumer(&self, queue: &str, id: ConsumerId) {
        let mut state = self.inner.state.lock();
        let Some(q) = state.queues.get_mut(queue) else {
            return;
        };

        let before = q.consumers.len();
        q.consumers.retain(|(cid, _)| *cid != id);
        if q.consumers.len() == before {
            return;
        }
        debug!(queue = queue, consumer = id, "Consumer cancelled");

        if q.consumers.is_empty() && q.options.auto_delete {
            state.queues.remove(queue);
            for bound in state.bindings.values_mut() {
                bound.retain(|q| q != queue);
            }
            debug!(queue = queue, "Auto-delete queue removed");
        }
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.inner.state.lock().queues.contains_key(queue)
    }

    /// Number of consumers currently attached to a queue.
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.len())
    }

    /// Messages waiting in a queue for a consumer.
    pub fn message_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.backlog.len())
    }

    /// Total publish calls, routed or not.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

/// Connector handing out connections to one in-memory broker.
pub struct InMemoryConnector {
    broker: InMemoryBroker,
    fail_remaining: AtomicU32,
    attempts: AtomicU64,
    connections: Mutex<Vec<Arc<InMemoryConnection>>>,
}

impl InMemoryConnector {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            fail_remaining: AtomicU32::new(0),
            attempts: AtomicU64::new(0),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Connection attempts so far, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Most recently established connection.
    pub fn latest_connection(&self) -> Option<Arc<InMemoryConnection>> {
        self.connections.lock().last().cloned()
    }

    pub fn open_connections(&self) -> usize {
        self.connections.lock().iter().filter(|c| c.is_open()).count()
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            debug!("Connection attempt refused");
            return Err(TransportError::ConnectionRefused("broker unavailable".into()));
        }

        let conn = Arc::new(InMemoryConnection {
            id: ConnectionId(self.broker.next_id()),
            broker: self.broker.clone(),
            open: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
        });
        self.connections.lock().push(conn.clone());

        info!(connection = %conn.id, "Connection established");
        Ok(conn)
    }
}

/// A connection to the in-memory broker.
pub struct InMemoryConnection {
    id: ConnectionId,
    broker: InMemoryBroker,
    open: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn ShutdownListener>>>,
    channels: Mutex<Vec<Arc<InMemoryChannel>>>,
}

impl InMemoryConnection {
    /// Close the connection from the application side.
    pub fn close(&self, reason: &str) {
        self.shutdown(reason, true);
    }

    /// Simulate the broker dropping the connection.
    pub fn fail(&self, reason: &str) {
        self.shutdown(reason, false);
    }

    fn shutdown(&self, reason: &str, initiated_by_application: bool) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        for channel in std::mem::take(&mut *self.channels.lock()) {
            channel.close();
        }
        let listeners = std::mem::take(&mut *self.listeners.lock());

        info!(
            connection = %self.id,
            reason = reason,
            listeners = listeners.len(),
            "Connection shut down"
        );

        let signal = ShutdownSignal {
            connection_id: self.id,
            reason: reason.to_string(),
            initiated_by_application,
        };
        for listener in listeners {
            listener.shutdown_completed(signal.clone());
        }
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn create_channel(&self) -> Result<Arc<dyn Channel>, TransportError> {
        let mut channels = self.channels.lock();
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        let channel = Arc::new(InMemoryChannel {
            id: ChannelId(self.broker.next_id()),
            broker: self.broker.clone(),
            open: AtomicBool::new(true),
            consumers: Mutex::new(Vec::new()),
        });
        channels.push(channel.clone());

        debug!(connection = %self.id, channel = %channel.id, "Channel opened");
        Ok(channel)
    }

    fn add_shutdown_listener(&self, listener: Arc<dyn ShutdownListener>) {
        let mut listeners = self.listeners.lock();
        if self.is_open() {
            listeners.push(listener);
            return;
        }
        drop(listeners);

        listener.shutdown_completed(ShutdownSignal {
            connection_id: self.id,
            reason: "connection already closed".into(),
            initiated_by_application: false,
        });
    }
}

/// A channel on an in-memory connection.
pub struct InMemoryChannel {
    id: ChannelId,
    broker: InMemoryBroker,
    open: AtomicBool,
    consumers: Mutex<Vec<(String, ConsumerId)>>,
}

impl InMemoryChannel {
    /// Close the channel, cancelling its consumers.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        for (queue, id) in std::mem::take(&mut *self.consumers.lock()) {
            self.broker.cancel_consumer(&queue, id);
        }
        debug!(channel = %self.id, "Channel closed");
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransportError::ChannelClosed)
        }
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn declare_queue(
        &self,
        name: Option<&str>,
        options: &QueueOptions,
    ) -> Result<String, TransportError> {
        self.ensure_open()?;
        Ok(self.broker.declare_queue(name, options))
    }

    async fn bind_queue(&self, queue: &str, route: &Route) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.broker.bind_queue(queue, route)
    }

    async fn publish(
        &self,
        route: &Route,
        body: Bytes,
        properties: MessageProperties,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.broker.publish(route, body, properties);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        self.ensure_open()?;
        let (id, stream) = self.broker.register_consumer(queue)?;

        let mut consumers = self.consumers.lock();
        if !self.is_open() {
            drop(consumers);
            self.broker.cancel_consumer(queue, id);
            return Err(TransportError::ChannelClosed);
        }
        consumers.push((queue.to_string(), id));
        Ok(stream)
    }
}
