//! One-shot result pair for a single RPC.
//!
//! [`PendingCall`] is the write half kept in the registry; [`RpcFuture`] is
//! the read half returned to the caller. Completing a call consumes it, so a
//! call resolves at most once.

use crate::correlation::CorrelationId;
use crate::error::RpcError;
use crate::response::RpcResponse;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// Final outcome of one RPC.
pub type RpcResult = Result<RpcResponse, RpcError>;

/// The unresolved side of a call, owned by the registry.
#[derive(Debug)]
pub struct PendingCall {
    id: CorrelationId,
    sender: oneshot::Sender<RpcResult>,
    created_at: Instant,
    timeout: Option<Duration>,
}

impl PendingCall {
    /// Create a call and the future its caller will wait on.
    pub fn new(id: CorrelationId, timeout: Option<Duration>) -> (PendingCall, RpcFuture) {
        let (sender, receiver) = oneshot::channel();
        let call = PendingCall {
            id,
            sender,
            created_at: Instant::now(),
            timeout,
        };
        (call, RpcFuture { id, receiver })
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// True when a timeout is set and has passed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.timeout
            .is_some_and(|t| now.saturating_duration_since(self.created_at) > t)
    }

    /// Resolve the call. Returns false if the caller already dropped its future.
    pub fn complete(self, result: RpcResult) -> bool {
        let id = self.id;
        match self.sender.send(result) {
            Ok(()) => true,
            Err(_) => {
                debug!(correlation_id = %id, "Caller dropped the future before resolution");
                false
            }
        }
    }
}

/// The caller's handle on an eventual response.
#[derive(Debug)]
#[must_use = "an RpcFuture does nothing unless awaited or polled"]
pub struct RpcFuture {
    id: CorrelationId,
    receiver: oneshot::Receiver<RpcResult>,
}

impl RpcFuture {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Poll without waiting.
    ///
    /// Returns `None` while unresolved. The outcome is handed out once;
    /// afterwards this reports [`RpcError::Abandoned`].
    pub fn try_result(&mut self) -> Option<RpcResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(RpcError::Abandoned(self.id))),
        }
    }

    /// Wait at most `limit`.
    ///
    /// On expiry the registry entry stays in place; a late response is then
    /// discarded when it arrives.
    pub async fn wait_timeout(self, limit: Duration) -> RpcResult {
        let id = self.id;
        match tokio::time::timeout(limit, self).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout { id, after: limit }),
        }
    }
}

impl Future for RpcFuture {
    type Output = RpcResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::Abandoned(id))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{reply_properties, ResponseStatus};
    use courier_transport::MapMessage;

    fn ok_response(id: CorrelationId) -> RpcResponse {
        RpcResponse::new(
            id,
            reply_properties(&id.to_string(), &ResponseStatus::Ok),
            MapMessage::new(),
        )
    }

    #[tokio::test]
    async fn test_complete_resolves_future() {
        let id = CorrelationId::new();
        let (call, future) = PendingCall::new(id, None);
        assert_eq!(future.id(), id);

        assert!(call.complete(Ok(ok_response(id))));
        let response = future.await.unwrap();
        assert_eq!(response.correlation_id, id);
    }

    #[tokio::test]
    async fn test_dropped_call_abandons_future() {
        let (call, future) = PendingCall::new(CorrelationId::new(), None);
        drop(call);
        assert!(matches!(future.await, Err(RpcError::Abandoned(_))));
    }

    #[test]
    fn test_complete_after_future_dropped() {
        let id = CorrelationId::new();
        let (call, future) = PendingCall::new(id, None);
        drop(future);
        assert!(!call.complete(Ok(ok_response(id))));
    }

    #[test]
    fn test_try_result() {
        let id = CorrelationId::new();
        let (call, mut future) = PendingCall::new(id, None);
        assert!(future.try_result().is_none());

        call.complete(Ok(ok_response(id)));
        assert!(matches!(future.try_result(), Some(Ok(_))));
        assert!(matches!(future.try_result(), Some(Err(RpcError::Abandoned(_)))));
    }

    #[tokio::test]
    async fn test_wait_timeout_expires() {
        let (_call, future) = PendingCall::new(CorrelationId::new(), None);
        let result = future.wait_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(RpcError::Timeout { .. })));
    }

    #[test]
    fn test_expiry() {
        let timeout = Some(Duration::from_millis(5));
        let (call, _future) = PendingCall::new(CorrelationId::new(), timeout);
        let now = Instant::now();
        assert!(!call.is_expired(now));
        assert!(call.is_expired(now + Duration::from_millis(50)));

        let (no_timeout, _f) = PendingCall::new(CorrelationId::new(), None);
        assert!(!no_timeout.is_expired(now + Duration::from_secs(3600)));
    }
}
