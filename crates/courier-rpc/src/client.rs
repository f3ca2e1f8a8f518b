//! RPC client: publish requests, match replies by correlation id.
//!
//! ```text
//! send_request ──► registry.put(id) ──► publish(route, reply_to, id)
//!                                              │
//!                                           broker
//!                                              │
//! RpcFuture ◄── call.complete ◄── registry.remove(id) ◄── ResponseDispatcher
//! ```
//!
//! Registration completes before the publish is issued, so a reply can never
//! arrive for an id the dispatcher does not know yet.

use crate::config::RpcConfig;
use crate::correlation::CorrelationId;
use crate::dispatcher::ResponseDispatcher;
use crate::error::RpcError;
use crate::future::{PendingCall, RpcFuture};
use crate::registry::{spawn_sweeper, CorrelationRegistry};
use courier_telemetry::metrics::RPC_REQUESTS_SENT;
use courier_transport::{
    encode, Channel, ConsumerHandle, MessageConsumer, MessageProperties, Route,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ClientInner {
    channel: Arc<dyn Channel>,
    request_route: Route,
    config: RpcConfig,
    registry: Arc<CorrelationRegistry>,
    dispatcher: ConsumerHandle,
    sweeper: Option<JoinHandle<()>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Client for request/response over a channel.
///
/// Cheap to clone; clones share the reply queue and the registry.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Create a client publishing to `request_route`.
    ///
    /// Declares a private reply queue on `channel` and starts consuming it.
    /// That consumer is not restarted if the channel dies.
    pub async fn new(
        channel: Arc<dyn Channel>,
        request_route: Route,
        config: RpcConfig,
    ) -> Result<Self, RpcError> {
        config.validate()?;

        let registry = Arc::new(CorrelationRegistry::new());
        let dispatcher = ResponseDispatcher::new(registry.clone(), config.response_mode);
        let dispatcher = MessageConsumer::new(
            Arc::new(dispatcher),
            channel.clone(),
            config.reply_queue.clone(),
            None,
        )
        .start()
        .await?;

        let sweeper = config
            .request_timeout
            .map(|_| spawn_sweeper(&registry, config.sweep_interval));

        info!(
            request_route = %request_route,
            reply_queue = dispatcher.queue_name(),
            response_mode = ?config.response_mode,
            request_timeout = ?config.request_timeout,
            "RPC client ready"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                channel,
                request_route,
                config,
                registry,
                dispatcher,
                sweeper,
            }),
        })
    }

    /// Publish a request and return a future for its response.
    ///
    /// Does not wait for the response. Fails synchronously if the payload
    /// cannot be encoded or the publish is rejected; in both cases nothing
    /// stays registered.
    pub async fn send_request<T>(&self, request: &T) -> Result<RpcFuture, RpcError>
    where
        T: Serialize + ?Sized,
    {
        let body = encode(request)?;

        let id = CorrelationId::new();
        let (call, future) = PendingCall::new(id, self.inner.config.request_timeout);
        self.inner.registry.put(id, call)?;

        let properties = MessageProperties::json()
            .with_correlation_id(id.to_string())
            .with_reply_to(self.reply_queue());

        if let Err(e) = self
            .inner
            .channel
            .publish(&self.inner.request_route, body, properties)
            .await
        {
            self.inner.registry.withdraw(&id);
            warn!(correlation_id = %id, error = %e, "Request publish failed");
            return Err(e.into());
        }

        RPC_REQUESTS_SENT.inc();
        debug!(
            correlation_id = %id,
            route = %self.inner.request_route,
            "Sent RPC request"
        );
        Ok(future)
    }

    /// Queue replies are delivered to.
    pub fn reply_queue(&self) -> &str {
        self.inner.dispatcher.queue_name()
    }

    pub fn request_route(&self) -> &Route {
        &self.inner.request_route
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Get number of calls still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.inner.registry
    }
}
