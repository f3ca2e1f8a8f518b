//! Message worker: one handler, one queue, kept subscribed across disconnects.
//!
//! `start()` subscribes; after that, every broker-side connection loss is
//! picked up by the worker's [`Reconnector`], which re-runs the same
//! subscription sequence until it succeeds or the retry budget is spent.

use crate::error::WorkerError;
use crate::policy::ReconnectPolicy;
use crate::reconnector::{ReconnectHandler, Reconnector};
use async_trait::async_trait;
use courier_transport::{
    encode, Channel, ChannelId, Connection, Connector, ConsumerHandle, MessageConsumer,
    MessageHandler, MessageProperties, QueueOptions, Route, ShutdownSignal, TransportError,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not started yet
    Stopped,
    /// Consuming on a live channel
    Subscribed,
    /// Connection lost, retry loop running
    Reconnecting,
    /// Retry budget exhausted; only `start()` recovers
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Subscribed => write!(f, "subscribed"),
            WorkerState::Reconnecting => write!(f, "reconnecting"),
            WorkerState::Failed => write!(f, "failed"),
        }
    }
}

/// Everything belonging to one successful subscribe.
struct ActiveSubscription {
    _connection: Arc<dyn Connection>,
    channel: Arc<dyn Channel>,
    consumer: ConsumerHandle,
    publish_route: Route,
}

/// Couples a [`MessageHandler`] with the plumbing to keep it fed.
pub struct MessageWorker<H: MessageHandler> {
    connector: Arc<dyn Connector>,
    handler: Arc<H>,
    queue_options: QueueOptions,
    route: Option<Route>,
    reconnector: Arc<Reconnector>,
    state: RwLock<WorkerState>,
    subscription: RwLock<Option<ActiveSubscription>>,
    /// Serialises subscribes
    start_lock: Mutex<()>,
}

impl<H: MessageHandler> MessageWorker<H> {
    /// Create a worker consuming from `route`'s queue, or from a fresh
    /// server-named queue when `route` is `None`.
    pub fn new(
        connector: Arc<dyn Connector>,
        handler: Arc<H>,
        queue_options: QueueOptions,
        route: Option<Route>,
        policy: ReconnectPolicy,
    ) -> Result<Arc<Self>, WorkerError> {
        policy.validate()?;

        Ok(Arc::new_cyclic(|worker: &Weak<Self>| {
            let callback = WorkerReconnect {
                worker: worker.clone(),
            };
            Self {
                connector,
                handler,
                queue_options,
                route,
                reconnector: Arc::new(Reconnector::new(Arc::new(callback), policy)),
                state: RwLock::new(WorkerState::Stopped),
                subscription: RwLock::new(None),
                start_lock: Mutex::new(()),
            }
        }))
    }

    /// Begin consuming and handling messages.
    ///
    /// Also the manual way out of `Failed`: the reconnect budget is reset.
    pub async fn start(&self) -> Result<(), WorkerError> {
        self.reconnector.reset();
        self.subscribe().await.map_err(|e| {
            error!(error = %e, "Worker failed to start");
            WorkerError::from(e)
        })
    }

    /// Publish `message` to the worker's route through the current channel.
    pub async fn send_message<T>(&self, message: &T) -> Result<(), WorkerError>
    where
        T: Serialize + ?Sized,
    {
        let state = self.state();
        if state != WorkerState::Subscribed {
            return Err(WorkerError::TransportUnavailable(state));
        }

        let (channel, route) = {
            let subscription = self.subscription.read();
            match subscription.as_ref() {
                Some(active) => (active.channel.clone(), active.publish_route.clone()),
                None => return Err(WorkerError::TransportUnavailable(state)),
            }
        };

        let body = encode(message)?;
        channel
            .publish(&route, body, MessageProperties::json())
            .await?;
        debug!(route = %route, channel = %channel.id(), "Worker sent message");
        Ok(())
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// Channel of the current subscription.
    pub fn active_channel_id(&self) -> Option<ChannelId> {
        self.subscription
            .read()
            .as_ref()
            .map(|active| active.channel.id())
    }

    /// Queue the current subscription consumes from.
    pub fn queue_name(&self) -> Option<String> {
        self.subscription
            .read()
            .as_ref()
            .map(|active| active.consumer.queue_name().to_string())
    }

    pub fn reconnector(&self) -> &Reconnector {
        &self.reconnector
    }

    fn set_state(&self, state: WorkerState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(from = %*current, to = %state, "Worker state change");
            *current = state;
        }
    }

    /// Connect, open a channel, start a consumer, and make it the active
    /// subscription. The replaced subscription's consumer stops when dropped.
    async fn subscribe(&self) -> Result<(), TransportError> {
        let _guard = self.start_lock.lock().await;

        let connection = self.connector.connect().await?;
        connection.add_shutdown_listener(self.reconnector.clone());
        let channel = connection.create_channel().await?;

        let consumer = MessageConsumer::new(
            self.handler.clone(),
            channel.clone(),
            self.queue_options.clone(),
            self.route.clone(),
        )
        .start()
        .await?;

        // The connection may have dropped while the consumer was starting.
        if !connection.is_open() {
            warn!(connection = %connection.id(), "Connection closed during subscribe");
            return Err(TransportError::ConnectionClosed);
        }

        let publish_route = self
            .route
            .clone()
            .unwrap_or_else(|| Route::queue(consumer.queue_name()));

        info!(
            connection = %connection.id(),
            channel = %channel.id(),
            queue = consumer.queue_name(),
            "Worker subscribed"
        );

        let previous = self.subscription.write().replace(ActiveSubscription {
            _connection: connection,
            channel,
            consumer,
            publish_route,
        });
        self.set_state(WorkerState::Subscribed);

        if let Some(previous) = previous {
            debug!(channel = %previous.channel.id(), "Dropping previous subscription");
        }
        Ok(())
    }
}

/// Reconnect callback holding only a weak reference to its worker.
pub struct WorkerReconnect<H: MessageHandler> {
    worker: Weak<MessageWorker<H>>,
}

#[async_trait]
impl<H: MessageHandler> ReconnectHandler for WorkerReconnect<H> {
    async fn reconnect(&self) -> Result<(), TransportError> {
        let Some(worker) = self.worker.upgrade() else {
            debug!("Worker dropped, nothing to reconnect");
            return Ok(());
        };
        worker.subscribe().await
    }

    fn connection_lost(&self, signal: &ShutdownSignal) {
        if let Some(worker) = self.worker.upgrade() {
            warn!(connection = %signal.connection_id, "Worker lost its connection");
            worker.set_state(WorkerState::Reconnecting);
        }
    }

    fn gave_up(&self, attempts: u32) {
        if let Some(worker) = self.worker.upgrade() {
            error!(attempts = attempts, "Worker failed permanently");
            worker.set_state(WorkerState::Failed);
        }
    }
}
