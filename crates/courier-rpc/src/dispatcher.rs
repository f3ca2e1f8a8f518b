//! Response dispatcher: completes pending calls from the reply queue.
//!
//! Runs once per inbound reply on the client's consumer task. Anomalies
//! (missing correlation metadata, unknown ids) are logged and dropped so that
//! one bad reply never stops consumption of the next.

use crate::config::ResponseMode;
use crate::correlation::CorrelationId;
use crate::error::RpcError;
use crate::registry::CorrelationRegistry;
use crate::response::RpcResponse;
use async_trait::async_trait;
use courier_telemetry::metrics::{
    RPC_LATENCY, RPC_MALFORMED_RESPONSES, RPC_ORPHAN_RESPONSES, RPC_RESPONSES,
};
use courier_transport::codec::pretty_print;
use courier_transport::{CodecError, Delivery, MapMessage, MessageHandler, MessageProperties};
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct ResponseDispatcher {
    registry: Arc<CorrelationRegistry>,
    mode: ResponseMode,
}

impl ResponseDispatcher {
    pub(crate) fn new(registry: Arc<CorrelationRegistry>, mode: ResponseMode) -> Self {
        Self { registry, mode }
    }

    fn correlation_id(properties: &MessageProperties) -> Option<CorrelationId> {
        let Some(raw) = properties.correlation_id.as_deref() else {
            warn!(properties = ?properties, "Reply without correlation id, dropping");
            RPC_MALFORMED_RESPONSES.inc();
            return None;
        };

        match CorrelationId::parse(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(
                    correlation_id = raw,
                    error = %e,
                    "Reply with invalid correlation id, dropping"
                );
                RPC_MALFORMED_RESPONSES.inc();
                None
            }
        }
    }
}

#[async_trait]
impl MessageHandler for ResponseDispatcher {
    type Message = MapMessage;

    async fn handle_message(&self, body: MapMessage, properties: &MessageProperties) {
        let Some(id) = Self::correlation_id(properties) else {
            return;
        };

        let Some(call) = self.registry.remove(&id) else {
            self.registry.record_orphan();
            RPC_ORPHAN_RESPONSES.inc();
            warn!(
                correlation_id = %id,
                properties = ?properties,
                body = %serde_json::Value::Object(body),
                "Received a response not meant for this client"
            );
            return;
        };

        RPC_LATENCY.observe(call.elapsed().as_secs_f64());
        let response = RpcResponse::new(id, properties.clone(), body);

        let result = match self.mode {
            ResponseMode::Raw => Ok(response),
            ResponseMode::Exception => response.into_result(),
        };

        let outcome = if result.is_ok() { "ok" } else { "remote_error" };
        RPC_RESPONSES.with_label_values(&[outcome]).inc();
        debug!(correlation_id = %id, outcome = outcome, "Dispatching response");

        call.complete(result);
    }

    fn decode_failed(&self, delivery: &Delivery, error: &CodecError) {
        let Some(id) = Self::correlation_id(&delivery.properties) else {
            return;
        };

        let Some(call) = self.registry.remove(&id) else {
            self.registry.record_orphan();
            RPC_ORPHAN_RESPONSES.inc();
            warn!(
                correlation_id = %id,
                body = %pretty_print(&delivery.body),
                "Undecodable response not meant for this client"
            );
            return;
        };

        warn!(correlation_id = %id, error = %error, "Response body is not a JSON object");
        RPC_RESPONSES.with_label_values(&["decode_error"]).inc();
        call.complete(Err(RpcError::InvalidResponse {
            id,
            reason: error.to_string(),
        }));
    }
}
