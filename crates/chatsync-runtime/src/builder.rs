//! Engine Builder API
//!
//! Collects the collaborators (transport, remote message API, optional query
//! cache), validates the configuration and starts a [`SyncEngine`]. Missing
//! collaborators and invalid settings are reported here, before anything runs.

use std::sync::Arc;

use chatsync_core::{
    create_notification_channel, create_transport_event_channel, ChatSyncResult,
    ConfigurationError, EngineConfig, EngineNotification, MessageApi, QueryCache, StateChange,
    Transport,
};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::coordinator::{CoordinatorParts, SendCoordinator};
use crate::engine::{EngineParts, SyncEngine};
use crate::lifecycle::Lifecycle;
use crate::managers::{ConnectionManager, MessageCache};
use crate::query_cache::InMemoryQueryCache;
use crate::router::EventRouter;
use crate::stats::EngineStats;

// ----------------------------------------------------------------------------
// Engine Builder
// ----------------------------------------------------------------------------

/// Builder for a running [`SyncEngine`]
pub struct EngineBuilder {
    config: EngineConfig,
    transport: Option<Box<dyn Transport>>,
    api: Option<Arc<dyn MessageApi>>,
    query_cache: Option<Arc<dyn QueryCache>>,
    auto_connect: bool,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            transport: None,
            api: None,
            query_cache: None,
            auto_connect: true,
        }
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the real-time transport (required)
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the remote message API (required)
    pub fn with_message_api(mut self, api: Arc<dyn MessageApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Use a host-provided query cache instead of the in-memory one
    pub fn with_query_cache(mut self, query_cache: Arc<dyn QueryCache>) -> Self {
        self.query_cache = Some(query_cache);
        self
    }

    /// Start connecting as soon as the engine is built (default: true)
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Build and start the engine
    pub async fn build_and_start(self) -> ChatSyncResult<SyncEngine> {
        self.config.validate()?;
        let mut transport = self
            .transport
            .ok_or_else(|| ConfigurationError::MissingCollaborator {
                name: "transport".to_string(),
            })?;
        let api = self
            .api
            .ok_or_else(|| ConfigurationError::MissingCollaborator {
                name: "message_api".to_string(),
            })?;

        let config = self.config;
        let engine_id = Uuid::new_v4();
        let span = info_span!("engine", %engine_id);
        info!(parent: &span, transport = transport.name(), "Building chatsync engine");

        let (event_sender, event_receiver) = create_transport_event_channel(&config.channels);
        let (notifier, _) = create_notification_channel(&config.channels);
        transport.attach_events(event_sender)?;
        let transport: Arc<dyn Transport> = Arc::from(transport);

        let lifecycle = Lifecycle::new();
        let stats = Arc::new(EngineStats::default());
        let query_cache = self.query_cache.unwrap_or_else(|| {
            Arc::new(InMemoryQueryCache::new(config.cache.query_stale_after()))
        });

        let cache = Arc::new(MessageCache::new(config.cache.max_messages_per_conversation));
        let connection = Arc::new(ConnectionManager::new(
            transport,
            config.reconnect.clone(),
            lifecycle.clone(),
            stats.clone(),
        ));
        let coordinator = Arc::new(SendCoordinator::new(CoordinatorParts {
            cache: cache.clone(),
            connection: connection.clone(),
            api: api.clone(),
            send_config: config.send.clone(),
            message_config: config.messages.clone(),
            max_pending: config.queue.max_pending,
            notifier: notifier.clone(),
            lifecycle: lifecycle.clone(),
            stats: stats.clone(),
        }));
        let router = Arc::new(EventRouter::new(
            cache.clone(),
            connection.clone(),
            coordinator.clone(),
            query_cache.clone(),
            notifier.clone(),
            lifecycle.clone(),
            stats.clone(),
        ));
        router.wire();

        let state_notifier = notifier.clone();
        connection.on_state_change(Arc::new(move |change: &StateChange| {
            let _ = state_notifier.send(EngineNotification::ConnectionChanged(change.to));
        }));

        let router_task = tokio::spawn(router.clone().run(event_receiver).instrument(span.clone()));

        let engine = SyncEngine::from_parts(EngineParts {
            engine_id,
            span,
            config,
            cache,
            connection,
            coordinator,
            router,
            router_task,
            query_cache,
            api,
            notifier,
            lifecycle,
            stats,
        });

        if self.auto_connect {
            engine.connect();
        }
        Ok(engine)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::{ChatSyncError, ConnectionState};
    use chatsync_harness::{MockMessageApi, MockTransport};

    #[tokio::test]
    async fn test_missing_transport_is_configuration_error() {
        let result = EngineBuilder::new()
            .with_message_api(Arc::new(MockMessageApi::new()))
            .build_and_start()
            .await;

        assert!(matches!(
            result,
            Err(ChatSyncError::Configuration(ConfigurationError::MissingCollaborator { ref name }))
                if name == "transport"
        ));
    }

    #[tokio::test]
    async fn test_missing_api_is_configuration_error() {
        let result = EngineBuilder::new()
            .with_transport(Box::new(MockTransport::new()))
            .build_and_start()
            .await;

        assert!(matches!(
            result,
            Err(ChatSyncError::Configuration(ConfigurationError::MissingCollaborator { ref name }))
                if name == "message_api"
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = EngineConfig::testing();
        config.send.max_attempts = 0;
        let result = EngineBuilder::new()
            .with_config(config)
            .with_transport(Box::new(MockTransport::new()))
            .with_message_api(Arc::new(MockMessageApi::new()))
            .build_and_start()
            .await;

        assert!(matches!(result, Err(ChatSyncError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_without_auto_connect_starts_disconnected() {
        let transport = MockTransport::new();
        let engine = EngineBuilder::new()
            .with_config(EngineConfig::testing())
            .with_transport(Box::new(transport.clone()))
            .with_message_api(Arc::new(MockMessageApi::new()))
            .auto_connect(false)
            .build_and_start()
            .await
            .unwrap();

        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_count(), 0);
        engine.shutdown().await;
    }
}
