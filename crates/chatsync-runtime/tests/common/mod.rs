//! Shared helpers for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chatsync_harness::{MockMessageApi, MockTransport};
use chatsync_runtime::{
    ConnectionState, EngineBuilder, EngineConfig, EngineNotification, NotificationReceiver,
    SyncEngine,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, timeout, Duration};

pub const WAIT: Duration = Duration::from_secs(2);

pub struct TestEngine {
    pub engine: SyncEngine,
    pub transport: MockTransport,
    pub api: MockMessageApi,
}

pub async fn start(api: MockMessageApi, auto_connect: bool) -> TestEngine {
    let transport = MockTransport::new();
    let engine = EngineBuilder::new()
        .with_config(EngineConfig::testing())
        .with_transport(Box::new(transport.clone()))
        .with_message_api(Arc::new(api.clone()))
        .auto_connect(auto_connect)
        .build_and_start()
        .await
        .expect("Failed to start engine");

    TestEngine {
        engine,
        transport,
        api,
    }
}

pub async fn start_connected(api: MockMessageApi) -> TestEngine {
    let test = start(api, true).await;
    wait_for_state(&test.engine, ConnectionState::Connected).await;
    test
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

pub async fn wait_for_state(engine: &SyncEngine, state: ConnectionState) {
    wait_until(|| engine.state() == state).await;
}

pub async fn next_matching(
    notifications: &mut NotificationReceiver,
    matches: impl Fn(&EngineNotification) -> bool,
) -> EngineNotification {
    timeout(WAIT, async {
        loop {
            match notifications.recv().await {
                Ok(notification) if matches(&notification) => return notification,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("Notification channel closed"),
            }
        }
    })
    .await
    .expect("Notification not received in time")
}
