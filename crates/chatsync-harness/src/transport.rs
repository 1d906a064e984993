//! Mock Transport for Testing
//!
//! Deterministic in-process transport. Connect outcomes are scripted, and the
//! test drives everything the server would: connection drops and inbound
//! messages. Clones share state, so a test keeps a handle after giving the
//! transport to the engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chatsync_core::{Message, Transport, TransportError, TransportEvent, TransportEventSender};
use tracing::{debug, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    events: Mutex<Option<TransportEventSender>>,
    open_outcomes: Mutex<VecDeque<Result<(), TransportError>>>,
    open_latency: Mutex<Duration>,
    manual_establish: AtomicBool,
    is_open: AtomicBool,
    opens: AtomicU64,
    closes: AtomicU64,
}

/// Scriptable transport
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    /// Transport whose connect attempts succeed and report `Connected` at once
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next connect attempt
    pub fn fail_next_open(&self, reason: &str) {
        lock(&self.inner.open_outcomes).push_back(Err(TransportError::ConnectFailed {
            reason: reason.to_string(),
        }));
    }

    /// Fail the next `count` connect attempts
    pub fn fail_opens(&self, count: usize, reason: &str) {
        for _ in 0..count {
            self.fail_next_open(reason);
        }
    }

    /// Delay every connect attempt
    pub fn set_open_latency(&self, latency: Duration) {
        *lock(&self.inner.open_latency) = latency;
    }

    /// When set, a successful `open` waits for [`establish`](Self::establish)
    pub fn set_manual_establish(&self, manual: bool) {
        self.inner.manual_establish.store(manual, Ordering::SeqCst);
    }

    /// Report a live connection
    pub async fn establish(&self) -> bool {
        self.inner.is_open.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Connected).await
    }

    /// Simulate the server dropping the connection
    pub async fn drop_connection(&self, reason: &str) -> bool {
        self.inner.is_open.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await
    }

    /// Push a message from the server
    pub async fn deliver(&self, message: Message) -> bool {
        self.emit(TransportEvent::MessageArrived(message)).await
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        let sender = lock(&self.inner.events).clone();
        let Some(sender) = sender else {
            debug!(event = event.event_name(), "No event channel attached");
            return false;
        };
        sender.send(event).await.is_ok()
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> u64 {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.inner.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn attach_events(&mut self, events: TransportEventSender) -> Result<(), TransportError> {
        *lock(&self.inner.events) = Some(events);
        Ok(())
    }

    async fn open(&self) -> Result<(), TransportError> {
        let attempt = self.inner.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = *lock(&self.inner.open_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let outcome = lock(&self.inner.open_outcomes).pop_front().unwrap_or(Ok(()));
        if let Err(err) = outcome {
            debug!(attempt, error = %err, "Mock connect attempt failed");
            return Err(err);
        }

        info!(attempt, "Mock transport opened");
        if !self.inner.manual_establish.load(Ordering::SeqCst) {
            self.establish().await;
        }
        Ok(())
    }

    async fn close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.is_open.store(false, Ordering::SeqCst);
        debug!("Mock transport closed");
    }

    fn name(&self) -> &str {
        "mock"
    }
}

impl core::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MockTransport")
            .field("is_open", &self.is_open())
            .field("opens", &self.open_count())
            .field("closes", &self.close_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::{create_transport_event_channel, ChannelConfig};

    #[tokio::test]
    async fn test_open_reports_connected() {
        let mut transport = MockTransport::new();
        let (tx, mut rx) = create_transport_event_channel(&ChannelConfig::default());
        transport.attach_events(tx).unwrap();

        transport.open().await.unwrap();

        assert!(transport.is_open());
        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Connected);
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let transport = MockTransport::new();
        transport.fail_opens(2, "refused");

        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_ok());
        assert_eq!(transport.open_count(), 3);
    }

    #[tokio::test]
    async fn test_clones_share_channel() {
        let mut transport = MockTransport::new();
        let handle = transport.clone();
        let (tx, mut rx) = create_transport_event_channel(&ChannelConfig::default());
        transport.attach_events(tx).unwrap();

        assert!(handle.drop_connection("server restart").await);
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::Disconnected {
                reason: "server restart".into()
            }
        );
    }

    #[tokio::test]
    async fn test_emit_without_channel() {
        let transport = MockTransport::new();
        assert!(!transport.establish().await);
    }
}
