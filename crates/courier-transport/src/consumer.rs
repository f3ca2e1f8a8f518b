//! # Message Consumer
//!
//! Binds a [`MessageHandler`] to a queue on a channel and drives the
//! delivery loop on a spawned task.
//!
//! A message that fails to decode, or whose handler panics, is logged and
//! skipped; the loop keeps consuming until the broker cancels the consumer
//! or the [`ConsumerHandle`] is dropped.

use crate::codec::{decode, pretty_print};
use crate::connection::{Channel, ChannelId};
use crate::error::{CodecError, TransportError};
use crate::message::{Delivery, MessageProperties, QueueOptions, Route};
use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Application logic invoked for each decoded message.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Body type decoded from JSON before the handler runs.
    type Message: DeserializeOwned + Send + 'static;

    async fn handle_message(&self, message: Self::Message, properties: &MessageProperties);

    /// Called instead of `handle_message` when the body does not decode.
    fn decode_failed(&self, delivery: &Delivery, error: &CodecError) {
        warn!(
            queue = %delivery.queue,
            delivery_tag = delivery.delivery_tag,
            error = %error,
            body = %pretty_print(&delivery.body),
            "Dropping undecodable message"
        );
    }
}

/// Declares a queue, subscribes to it and feeds the handler.
pub struct MessageConsumer<H: MessageHandler> {
    handler: Arc<H>,
    channel: Arc<dyn Channel>,
    options: QueueOptions,
    /// `None` consumes from a fresh server-named queue
    route: Option<Route>,
}

impl<H: MessageHandler> MessageConsumer<H> {
    pub fn new(
        handler: Arc<H>,
        channel: Arc<dyn Channel>,
        options: QueueOptions,
        route: Option<Route>,
    ) -> Self {
        Self {
            handler,
            channel,
            options,
            route,
        }
    }

    /// Declare (and bind) the queue, then spawn the delivery loop.
    pub async fn start(self) -> Result<ConsumerHandle, TransportError> {
        let requested = self.route.as_ref().map(|r| r.routing_key.as_str());
        let queue = self.channel.declare_queue(requested, &self.options).await?;

        if let Some(route) = self.route.as_ref().filter(|r| !r.is_default_exchange()) {
            self.channel.bind_queue(&queue, route).await?;
        }

        let mut stream = self.channel.consume(&queue).await?;
        let channel_id = self.channel.id();
        let handler = self.handler;
        let loop_queue = queue.clone();

        debug!(queue = %queue, channel = %channel_id, "Consumer started");

        let task = tokio::spawn(async move {
            while let Some(delivery) = stream.recv().await {
                let message = match decode::<H::Message>(&delivery.body) {
                    Ok(message) => message,
                    Err(e) => {
                        handler.decode_failed(&delivery, &e);
                        continue;
                    }
                };

                let handling = handler.handle_message(message, &delivery.properties);
                let handled = AssertUnwindSafe(handling).catch_unwind().await;

                if handled.is_err() {
                    error!(
                        queue = %loop_queue,
                        delivery_tag = delivery.delivery_tag,
                        "Message handler panicked, continuing with next delivery"
                    );
                }
            }
            debug!(queue = %loop_queue, channel = %channel_id, "Consumer stream ended");
        });

        Ok(ConsumerHandle {
            queue,
            channel_id,
            task,
        })
    }
}

/// A running consumer. Dropping it stops the delivery loop.
#[derive(Debug)]
pub struct ConsumerHandle {
    queue: String,
    channel_id: ChannelId,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Name of the consumed queue (server-generated for anonymous queues).
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// True once the broker cancelled the consumer.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
