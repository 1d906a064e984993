//! Conversation list and history reads through the query cache

mod common;

use std::sync::Arc;

use chatsync_harness::{MockMessageApi, MockTransport};
use chatsync_runtime::{
    ConnectionState, ConversationId, EngineBuilder, EngineConfig, EngineNotification,
    InMemoryQueryCache, Message, MessageId, QueryCache, QueryKey, QueryValue, SenderType,
};
use chrono::Utc;
use common::{next_matching, start, start_connected, wait_for_state, wait_until};
use tokio::time::Duration;

#[tokio::test]
async fn test_conversation_list_is_cached_until_invalidated() {
    let test = start_connected(MockMessageApi::seeded()).await;

    let first = test.engine.conversations().await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].customer_name, "Nimal Perera");

    test.api.set_unavailable(true);
    assert_eq!(test.engine.conversations().await.unwrap(), first);

    let mut notifications = test.engine.notifications();
    test.transport
        .deliver(Message::new(
            MessageId::new("m30"),
            "c2".into(),
            SenderType::Customer,
            "Also 2 packets of dhal",
            Utc::now(),
        ))
        .await;
    next_matching(&mut notifications, |n| {
        *n == EngineNotification::ConversationsInvalidated
    })
    .await;

    assert!(test.engine.conversations().await.is_err());
    test.api.set_unavailable(false);
    assert_eq!(test.engine.conversations().await.unwrap().len(), 2);

    test.engine.shutdown().await;
}

#[tokio::test]
async fn test_confirmed_send_refreshes_conversation_list() {
    let test = start_connected(MockMessageApi::seeded()).await;
    let before = test.engine.conversations().await.unwrap();
    assert_eq!(before[1].id, ConversationId::new("c2"));

    let outcome = test
        .engine
        .send(&"c2".into(), "Yes, 5kg samba is available")
        .await
        .unwrap();
    assert!(outcome.is_delivered());

    let after = test.engine.conversations().await.unwrap();
    assert_eq!(after[0].id, ConversationId::new("c2"));
    assert_eq!(after[0].last_message, "Yes, 5kg samba is available");

    test.engine.shutdown().await;
}

#[tokio::test]
async fn test_load_conversation_merges_with_pending() {
    let test = start(MockMessageApi::seeded(), false).await;
    let c1 = ConversationId::new("c1");
    test.engine.send(&c1, "Delivering in 30 minutes").await.unwrap();

    let loaded = test.engine.load_conversation(&c1).await.unwrap();
    let ids: Vec<_> = loaded.iter().map(|m| m.id.to_string()).collect();
    assert_eq!(ids, vec!["m1", "m2", "temp-1"]);

    let reloaded = test.engine.load_conversation(&c1).await.unwrap();
    assert_eq!(reloaded, loaded);

    test.engine.shutdown().await;
}

#[tokio::test]
async fn test_load_conversation_failure_leaves_cache() {
    let test = start(MockMessageApi::seeded(), false).await;
    test.api.set_unavailable(true);

    assert!(test.engine.load_conversation(&"c1".into()).await.is_err());
    assert!(test.engine.messages(&"c1".into()).is_empty());

    test.engine.shutdown().await;
}

#[tokio::test]
async fn test_message_lists_are_mirrored_into_query_cache() {
    let query_cache = Arc::new(InMemoryQueryCache::new(Duration::from_secs(30)));
    let transport = MockTransport::new();
    let api = MockMessageApi::new();
    api.set_next_id(9);
    let engine = EngineBuilder::new()
        .with_config(EngineConfig::testing())
        .with_transport(Box::new(transport))
        .with_message_api(Arc::new(api))
        .with_query_cache(query_cache.clone())
        .build_and_start()
        .await
        .unwrap();
    wait_for_state(&engine, ConnectionState::Connected).await;

    engine.send(&"c1".into(), "Hello").await.unwrap();

    let key = QueryKey::Messages("c1".into());
    wait_until(|| {
        matches!(
            query_cache.get(&key),
            Some(QueryValue::Messages(ref messages))
                if messages.len() == 1 && messages[0].id == MessageId::new("m9")
        )
    })
    .await;

    engine.shutdown().await;
}
