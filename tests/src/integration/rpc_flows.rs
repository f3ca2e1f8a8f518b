//! # RPC Flows
//!
//! An `RpcClient` talking to the math service hosted on a `MessageWorker`.
//!
//! ## Flows Tested
//!
//! 1. **Round trip**: request routed to the service queue, reply matched by id
//! 2. **Fan-out**: many concurrent requests each resolve exactly once
//! 3. **Failure modes**: exception mode vs raw mode for non-OK replies
//! 4. **Anomalies**: unknown ids and missing metadata never disturb pending calls

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use futures::future::join_all;
    use serde_json::json;
    use tokio::time::timeout;

    use courier_rpc::{reply_properties, ResponseStatus, RpcClient, RpcConfig, RpcError};
    use courier_transport::{encode, MessageProperties, Route};

    use crate::fixtures::{MathFixture, MATH_QUEUE};

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    async fn client(fixture: &MathFixture, config: RpcConfig) -> RpcClient {
        let channel = fixture.client_channel().await.unwrap();
        RpcClient::new(channel, Route::queue(MATH_QUEUE), config)
            .await
            .unwrap()
    }

    // =========================================================================
    // ROUND TRIP
    // =========================================================================

    #[tokio::test]
    async fn test_add_round_trip() {
        let fixture = MathFixture::start().await.unwrap();
        let client = client(&fixture, RpcConfig::default()).await;

        let future = client
            .send_request(&json!({"op": "add", "a": 2, "b": 3}))
            .await
            .unwrap();
        let response = timeout(Duration::from_secs(1), future).await.unwrap().unwrap();

        assert!(response.is_ok());
        assert_eq!(response.body["sum"], 5);
        assert_eq!(client.pending_count(), 0);
        assert_eq!(fixture.service.handled(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_resolve_exactly_once() {
        let fixture = MathFixture::start().await.unwrap();
        let client = client(&fixture, RpcConfig::default()).await;

        let sends = (0..100i64).map(|i| {
            let client = client.clone();
            async move {
                let future = client
                    .send_request(&json!({"op": "add", "a": i, "b": 1000}))
                    .await
                    .unwrap();
                (i, future)
            }
        });
        let pending = join_all(sends).await;

        let ids: HashSet<_> = pending.iter().map(|(_, future)| future.id()).collect();
        assert_eq!(ids.len(), 100);

        let results = timeout(
            Duration::from_secs(5),
            join_all(pending.into_iter().map(|(i, future)| async move {
                (i, future.await)
            })),
        )
        .await
        .unwrap();

        for (i, result) in results {
            let response = result.unwrap();
            assert_eq!(response.body["sum"], i + 1000);
        }
        assert_eq!(client.pending_count(), 0);
        assert_eq!(fixture.service.handled(), 100);
    }

    // =========================================================================
    // FAILURE MODES
    // =========================================================================

    #[tokio::test]
    async fn test_exception_mode_fails_future() {
        let fixture = MathFixture::start().await.unwrap();
        let client = client(&fixture, RpcConfig::default()).await;

        let future = client.send_request(&json!({"op": "fail"})).await.unwrap();
        let err = timeout(Duration::from_secs(1), future).await.unwrap().unwrap_err();

        assert!(err.is_remote());
        let msg = err.to_string();
        assert!(msg.starts_with("INTERNAL_ERROR"), "{msg}");
        assert!(msg.contains("ArithmeticError"), "{msg}");
        assert!(msg.contains("division by zero"), "{msg}");
    }

    #[tokio::test]
    async fn test_raw_mode_returns_status_and_body() {
        let fixture = MathFixture::start().await.unwrap();
        let client = client(&fixture, RpcConfig::raw()).await;

        let future = client.send_request(&json!({"op": "nope"})).await.unwrap();
        let response = timeout(Duration::from_secs(1), future).await.unwrap().unwrap();

        assert_eq!(response.status, ResponseStatus::InvalidRequest);
        assert_eq!(response.exception_name(), Some("UnknownOp"));

        // Raw responses can still be converted on demand
        assert!(matches!(response.into_result(), Err(RpcError::Remote { .. })));
    }

    // =========================================================================
    // ANOMALIES
    // =========================================================================

    #[tokio::test]
    async fn test_stray_replies_leave_pending_calls_alone() {
        let fixture = MathFixture::start().await.unwrap();
        // Client on a queue nobody serves, so only our stray replies arrive
        let channel = fixture.client_channel().await.unwrap();
        let client = RpcClient::new(channel.clone(), Route::queue("unserved"), RpcConfig::default())
            .await
            .unwrap();

        let mut future = client.send_request(&json!({"op": "add"})).await.unwrap();
        let reply_route = Route::queue(client.reply_queue());

        channel
            .publish(
                &reply_route,
                encode(&json!({"sum": 1})).unwrap(),
                reply_properties("3f1c0a52-6bd4-4a5e-9c1e-7c5d2f0b8e11", &ResponseStatus::Ok),
            )
            .await
            .unwrap();
        channel
            .publish(&reply_route, encode(&json!({})).unwrap(), MessageProperties::json())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(future.try_result().is_none());
        assert_eq!(client.pending_count(), 1);

        // The real reply still resolves it
        channel
            .publish(
                &reply_route,
                encode(&json!({"sum": 7})).unwrap(),
                reply_properties(&future.id().to_string(), &ResponseStatus::Ok),
            )
            .await
            .unwrap();
        let response = timeout(Duration::from_secs(1), future).await.unwrap().unwrap();
        assert_eq!(response.body["sum"], 7);
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let fixture = MathFixture::start().await.unwrap();
        let channel = fixture.client_channel().await.unwrap();
        let config = RpcConfig::default()
            .with_request_timeout(Duration::from_millis(50))
            .with_sweep_interval(Duration::from_millis(10));
        let client = RpcClient::new(channel, Route::queue("unserved"), config)
            .await
            .unwrap();

        let future = client.send_request(&json!({})).await.unwrap();
        let result = timeout(Duration::from_secs(2), future).await.unwrap();
        assert!(matches!(result, Err(RpcError::Timeout { .. })));
        assert_eq!(client.pending_count(), 0);
    }
}
