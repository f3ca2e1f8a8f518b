//! Shared test fixtures.
//!
//! The math service answers `{"op": "add", "a": .., "b": ..}` with
//! `{"sum": ..}` and `{"op": "fail"}` with an `INTERNAL_ERROR` reply. Anything
//! else gets `INVALID_REQUEST`.

use async_trait::async_trait;
use bytes::Bytes;
use courier_rpc::{reply_properties, ResponseStatus, EXCEPTION_MSG_KEY, EXCEPTION_NAME_KEY};
use courier_transport::{
    encode, Channel, ChannelId, Connection, ConnectionId, Connector, DeliveryStream,
    InMemoryBroker, InMemoryConnection, InMemoryConnector, MapMessage, MessageHandler,
    MessageProperties, QueueOptions, Route, ShutdownListener, TransportError,
};
use courier_worker::{MessageWorker, ReconnectPolicy};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const MATH_QUEUE: &str = "math.requests";

/// Replies through its own connection so the service worker can be
/// disconnected independently.
pub struct MathService {
    replies: Arc<dyn Channel>,
    handled: AtomicU64,
}

impl MathService {
    pub fn new(replies: Arc<dyn Channel>) -> Self {
        Self {
            replies,
            handled: AtomicU64::new(0),
        }
    }

    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }

    fn evaluate(request: &MapMessage) -> (ResponseStatus, Value) {
        match request.get("op").and_then(Value::as_str) {
            Some("add") => {
                let a = request.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = request.get("b").and_then(Value::as_i64).unwrap_or(0);
                (ResponseStatus::Ok, json!({ "sum": a + b }))
            }
            Some("fail") => (
                ResponseStatus::InternalError,
                json!({
                    EXCEPTION_NAME_KEY: "ArithmeticError",
                    EXCEPTION_MSG_KEY: "division by zero",
                }),
            ),
            other => (
                ResponseStatus::InvalidRequest,
                json!({ EXCEPTION_NAME_KEY: "UnknownOp", EXCEPTION_MSG_KEY: format!("{other:?}") }),
            ),
        }
    }
}

#[async_trait]
impl MessageHandler for MathService {
    type Message = MapMessage;

    async fn handle_message(&self, request: MapMessage, properties: &MessageProperties) {
        self.handled.fetch_add(1, Ordering::SeqCst);

        let (Some(reply_to), Some(correlation_id)) =
            (properties.reply_to.as_deref(), properties.correlation_id.as_deref())
        else {
            warn!("Request without reply metadata");
            return;
        };

        let (status, body) = Self::evaluate(&request);
        let Ok(body) = encode(&body) else {
            return;
        };
        if let Err(e) = self
            .replies
            .publish(
                &Route::queue(reply_to),
                body,
                reply_properties(correlation_id, &status),
            )
            .await
        {
            warn!(error = %e, "Reply publish failed");
        }
    }
}

/// A broker with a math service worker consuming `MATH_QUEUE`.
pub struct MathFixture {
    pub broker: InMemoryBroker,
    /// Connector used only by the service worker
    pub service_connector: Arc<InMemoryConnector>,
    pub service: Arc<MathService>,
    pub worker: Arc<MessageWorker<MathService>>,
}

impl MathFixture {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with_policy(fast_policy()).await
    }

    pub async fn start_with_policy(policy: ReconnectPolicy) -> anyhow::Result<Self> {
        Self::build(policy, None).await
    }

    /// Like `start`, but the service's `nth` connection drops as soon as its
    /// consumer is registered.
    pub async fn start_flapping(nth: u64) -> anyhow::Result<Self> {
        Self::build(fast_policy(), Some(nth)).await
    }

    async fn build(policy: ReconnectPolicy, flap_on: Option<u64>) -> anyhow::Result<Self> {
        let broker = InMemoryBroker::new();

        let reply_connection = InMemoryConnector::new(broker.clone()).connect().await?;
        let service = Arc::new(MathService::new(reply_connection.create_channel().await?));

        let service_connector = Arc::new(InMemoryConnector::new(broker.clone()));
        let connector: Arc<dyn Connector> = match flap_on {
            Some(nth) => Arc::new(FlappingConnector::new(service_connector.clone(), nth)),
            None => service_connector.clone(),
        };
        let worker = MessageWorker::new(
            connector,
            service.clone(),
            QueueOptions::durable(),
            Some(Route::queue(MATH_QUEUE)),
            policy,
        )?;
        worker.start().await?;

        Ok(Self {
            broker,
            service_connector,
            service,
            worker,
        })
    }

    /// A fresh client-side channel on its own connection.
    pub async fn client_channel(&self) -> anyhow::Result<Arc<dyn Channel>> {
        let connection = InMemoryConnector::new(self.broker.clone()).connect().await?;
        Ok(connection.create_channel().await?)
    }

    /// Simulate the broker dropping the service worker's connection.
    pub fn drop_service_connection(&self) {
        if let Some(connection) = self.service_connector.latest_connection() {
            connection.fail("broker restart");
        }
    }
}

/// Connector whose `nth` connection fails right after a consumer starts on
/// it, before the caller has finished setting up.
pub struct FlappingConnector {
    inner: Arc<InMemoryConnector>,
    nth: u64,
    connects: AtomicU64,
}

impl FlappingConnector {
    pub fn new(inner: Arc<InMemoryConnector>, nth: u64) -> Self {
        Self {
            inner,
            nth,
            connects: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Connector for FlappingConnector {
    async fn connect(&self) -> Result<Arc<dyn Connection>, TransportError> {
        let connection = self.inner.connect().await?;
        let count = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if count != self.nth {
            return Ok(connection);
        }
        let Some(raw) = self.inner.latest_connection() else {
            return Ok(connection);
        };
        Ok(Arc::new(FlappingConnection { raw }))
    }
}

struct FlappingConnection {
    raw: Arc<InMemoryConnection>,
}

#[async_trait]
impl Connection for FlappingConnection {
    fn id(&self) -> ConnectionId {
        self.raw.id()
    }

    fn is_open(&self) -> bool {
        self.raw.is_open()
    }

    async fn create_channel(&self) -> Result<Arc<dyn Channel>, TransportError> {
        let channel = self.raw.create_channel().await?;
        Ok(Arc::new(FlappingChannel {
            inner: channel,
            connection: self.raw.clone(),
        }))
    }

    fn add_shutdown_listener(&self, listener: Arc<dyn ShutdownListener>) {
        self.raw.add_shutdown_listener(listener);
    }
}

struct FlappingChannel {
    inner: Arc<dyn Channel>,
    connection: Arc<InMemoryConnection>,
}

#[async_trait]
impl Channel for FlappingChannel {
    fn id(&self) -> ChannelId {
        self.inner.id()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn declare_queue(
        &self,
        name: Option<&str>,
        options: &QueueOptions,
    ) -> Result<String, TransportError> {
        self.inner.declare_queue(name, options).await
    }

    async fn bind_queue(&self, queue: &str, route: &Route) -> Result<(), TransportError> {
        self.inner.bind_queue(queue, route).await
    }

    async fn publish(
        &self,
        route: &Route,
        body: Bytes,
        properties: MessageProperties,
    ) -> Result<(), TransportError> {
        self.inner.publish(route, body, properties).await
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        let stream = self.inner.consume(queue).await?;
        self.connection.fail("connection reset during setup");
        Ok(stream)
    }
}

pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy::default().with_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

/// Poll `condition` every few milliseconds for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
