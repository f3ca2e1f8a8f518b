//! # Recovery Scenarios
//!
//! The math service's connection is dropped by the "broker" while a client
//! keeps talking to it.
//!
//! ## Scenarios Tested
//!
//! 1. **Resubscribe**: a dropped service comes back on a new channel and answers
//! 2. **Backlog**: requests published during the outage are answered afterwards
//! 3. **Exhaustion**: ten refused reconnects leave the worker `Failed`
//! 4. **Metrics**: reconnect outcomes show up in the exported text
//! 5. **Flap**: the fresh connection drops again mid-resubscribe; the worker
//!    keeps reconnecting instead of settling on a dead connection

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use courier_rpc::{RpcClient, RpcConfig};
    use courier_telemetry::{encode_metrics, register_metrics};
    use courier_transport::Route;
    use courier_worker::{ReconnectPolicy, ReconnectState, WorkerError, WorkerState};

    use crate::fixtures::{eventually, MathFixture, MATH_QUEUE};

    async fn client(fixture: &MathFixture) -> RpcClient {
        let channel = fixture.client_channel().await.unwrap();
        RpcClient::new(channel, Route::queue(MATH_QUEUE), RpcConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_service_resubscribes_after_broker_drop() {
        let fixture = MathFixture::start().await.unwrap();
        let client = client(&fixture).await;
        let first_channel = fixture.worker.active_channel_id().unwrap();

        fixture.drop_service_connection();
        assert!(
            eventually(|| {
                fixture.worker.state() == WorkerState::Subscribed
                    && fixture.worker.active_channel_id() != Some(first_channel)
            })
            .await
        );
        assert_eq!(fixture.broker.consumer_count(MATH_QUEUE), 1);

        let future = client
            .send_request(&json!({"op": "add", "a": 40, "b": 2}))
            .await
            .unwrap();
        let response = timeout(Duration::from_secs(1), future).await.unwrap().unwrap();
        assert_eq!(response.body["sum"], 42);
    }

    #[tokio::test]
    async fn test_request_during_outage_answered_after_recovery() {
        let policy = ReconnectPolicy::default()
            .with_backoff(Duration::from_millis(50), Duration::from_millis(50));
        let fixture = MathFixture::start_with_policy(policy).await.unwrap();
        let client = client(&fixture).await;

        fixture.drop_service_connection();
        assert_eq!(fixture.worker.state(), WorkerState::Reconnecting);

        // Durable queue keeps the request until the service is back
        let future = client
            .send_request(&json!({"op": "add", "a": 1, "b": 1}))
            .await
            .unwrap();
        assert_eq!(fixture.broker.message_count(MATH_QUEUE), 1);

        let response = timeout(Duration::from_secs(2), future).await.unwrap().unwrap();
        assert_eq!(response.body["sum"], 2);
        assert_eq!(fixture.worker.state(), WorkerState::Subscribed);
    }

    #[tokio::test]
    async fn test_worker_fails_after_ten_refused_reconnects() {
        let fixture = MathFixture::start().await.unwrap();
        let attempts_before = fixture.service_connector.connect_attempts();

        fixture.service_connector.fail_next(u32::MAX);
        fixture.drop_service_connection();

        assert!(eventually(|| fixture.worker.state() == WorkerState::Failed).await);
        assert_eq!(fixture.worker.reconnector().state(), ReconnectState::GaveUp);
        assert_eq!(fixture.service_connector.connect_attempts() - attempts_before, 10);

        let err = fixture.worker.send_message(&json!({})).await.unwrap_err();
        assert!(matches!(err, WorkerError::TransportUnavailable(WorkerState::Failed)));

        // Manual restart once the broker accepts connections again
        fixture.service_connector.fail_next(0);
        fixture.worker.start().await.unwrap();
        assert_eq!(fixture.worker.state(), WorkerState::Subscribed);
    }

    #[tokio::test]
    async fn test_connection_dropped_during_resubscribe_recovers() {
        // Connection 1 is the initial start, connection 2 drops once consuming
        let fixture = MathFixture::start_flapping(2).await.unwrap();
        let client = client(&fixture).await;

        fixture.drop_service_connection();
        assert!(
            eventually(|| {
                fixture.service_connector.connect_attempts() >= 3
                    && fixture.worker.state() == WorkerState::Subscribed
                    && fixture.worker.reconnector().state() == ReconnectState::Idle
            })
            .await
        );
        assert_eq!(fixture.service_connector.connect_attempts(), 3);
        assert_eq!(fixture.service_connector.open_connections(), 1);
        assert_eq!(fixture.broker.consumer_count(MATH_QUEUE), 1);

        let future = client
            .send_request(&json!({"op": "add", "a": 2, "b": 3}))
            .await
            .unwrap();
        let response = timeout(Duration::from_secs(1), future).await.unwrap().unwrap();
        assert_eq!(response.body["sum"], 5);
        assert_eq!(fixture.broker.message_count(MATH_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_reconnect_metrics_exported() {
        let _ = register_metrics();
        let fixture = MathFixture::start().await.unwrap();

        fixture.drop_service_connection();
        assert!(
            eventually(|| {
                fixture.worker.state() == WorkerState::Subscribed
                    && fixture.worker.reconnector().state() == ReconnectState::Idle
            })
            .await
        );

        let text = encode_metrics().unwrap();
        assert!(text.contains("courier_reconnect_attempts_total"));
    }
}
