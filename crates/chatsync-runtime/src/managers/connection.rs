//! Connection lifecycle management
//!
//! The ConnectionManager owns the single [`ConnectionState`] of an engine, drives
//! the transport through `open`/`close`, and reconnects after unexpected drops
//! with exponential backoff and no attempt limit.
//!
//! Every transition runs through [`ConnectionState::transition`] and is handed to
//! the registered listeners synchronously, in transition order. Listeners must
//! not call back into the manager from inside the handler.
//!
//! A transport's `Connected` event only promotes the attempt whose `open` has
//! returned `Ok`. An event that arrives while `open` is still in flight is held
//! until `open` returns, and dropped if it fails, so a `Connected` left over from
//! an earlier connection cannot complete a newer attempt on its own.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chatsync_core::{
    ConnectionEvent, ConnectionState, ReconnectConfig, StateChange, StateTransitionError,
    Transport,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::lifecycle::Lifecycle;
use crate::stats::EngineStats;

/// Listener invoked on every connection state transition
pub type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Handle for removing a state listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Which attempt has finished `open` and which has been reported live
#[derive(Debug, Default)]
struct AttemptProgress {
    opened: u64,
    signalled: u64,
}

// ----------------------------------------------------------------------------
// Reconnect Backoff
// ----------------------------------------------------------------------------

/// Exponential backoff between reconnect attempts
#[derive(Debug)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectBackoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay();
        Self {
            config,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt; there is always a next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;

        self.attempt_count = self.attempt_count.saturating_add(1);
        let next_millis = (self.current_delay.as_millis() as f64 * self.config.backoff_multiplier)
            .min(self.config.max_delay_ms as f64) as u64;
        self.current_delay = Duration::from_millis(next_millis);

        delay
    }

    /// Call on a successful connection
    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay();
        self.attempt_count = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

/// Owns the transport connection state machine and reconnection policy
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    state: Mutex<ConnectionState>,
    /// Held across a transition and its listener calls
    order: Mutex<()>,
    listeners: Mutex<Vec<(ListenerId, StateListener)>>,
    next_listener: AtomicU64,
    /// Bumped on every connect attempt and disconnect; stale `open` results are dropped
    epoch: AtomicU64,
    explicit_disconnect: AtomicBool,
    progress: Mutex<AttemptProgress>,
    backoff: Mutex<ReconnectBackoff>,
    connect_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    lifecycle: Lifecycle,
    stats: Arc<EngineStats>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ReconnectConfig,
        lifecycle: Lifecycle,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            transport,
            state: Mutex::new(ConnectionState::Disconnected),
            order: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            explicit_disconnect: AtomicBool::new(false),
            progress: Mutex::new(AttemptProgress::default()),
            backoff: Mutex::new(ReconnectBackoff::new(config)),
            connect_task: Mutex::new(None),
            reconnect_task: Mutex::new(None),
            lifecycle,
            stats,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Register a listener; several may be registered
    pub fn on_state_change(&self, listener: StateListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered state listeners
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn clear_listeners(&self) {
        lock(&self.listeners).clear();
    }

    /// Whether an automatic reconnect is scheduled
    pub fn reconnect_pending(&self) -> bool {
        lock(&self.reconnect_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Attempts since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.backoff).attempt_count()
    }

    fn apply(&self, event: ConnectionEvent) -> Result<StateChange, StateTransitionError> {
        let _order = lock(&self.order);
        let change = {
            let mut state = lock(&self.state);
            let change = state.transition(event)?;
            *state = change.to;
            change
        };
        info!(from = %change.from, state = %change.to, cause = ?change.cause, "Connection state changed");

        let listeners: Vec<StateListener> =
            lock(&self.listeners).iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&change);
        }
        Ok(change)
    }

    /// Begin a connection attempt
    ///
    /// Returns `false` if the manager is not Disconnected or the engine is shut
    /// down. The outcome is reported later: the router calls
    /// [`mark_connected`](Self::mark_connected) when the transport reports a live
    /// connection, and a failed `open` goes through the transport-error path.
    /// Connected is entered once both the report and a successful `open` are in.
    pub fn connect(self: &Arc<Self>) -> bool {
        self.explicit_disconnect.store(false, Ordering::Release);
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }
        self.start_attempt()
    }

    fn start_attempt(self: &Arc<Self>) -> bool {
        if !self.lifecycle.is_alive() {
            return false;
        }
        if let Err(err) = self.apply(ConnectionEvent::Connect) {
            debug!(error = %err, "Connect ignored");
            return false;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let manager = Arc::downgrade(self);
        let transport = self.transport.clone();
        let task = tokio::spawn(
            async move {
                let result = transport.open().await;
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                if !manager.is_current(epoch) {
                    debug!(epoch, "Discarding stale connect result");
                    return;
                }
                match result {
                    Ok(()) => {
                        manager.open_succeeded(epoch);
                    }
                    Err(err) => {
                        warn!(transport = transport.name(), error = %err, "Connect attempt failed");
                        manager.handle_transport_loss(&err.to_string());
                    }
                }
            }
            .in_current_span(),
        );
        if let Some(previous) = lock(&self.connect_task).replace(task) {
            previous.abort();
        }
        true
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lifecycle.is_alive() && self.epoch.load(Ordering::Acquire) == epoch
    }

    /// The transport reported a live connection
    ///
    /// Returns `true` if the manager entered Connected. Returns `false` while
    /// the current attempt's `open` is still in flight; the report is then
    /// applied when `open` succeeds.
    pub fn mark_connected(&self) -> bool {
        if !self.lifecycle.is_alive() {
            return false;
        }
        let epoch = self.epoch.load(Ordering::Acquire);
        let opened = {
            let mut progress = lock(&self.progress);
            progress.signalled = epoch;
            progress.opened == epoch
        };
        if !opened {
            debug!(epoch, "Connected reported before open completed");
            return false;
        }
        self.establish()
    }

    fn open_succeeded(&self, epoch: u64) -> bool {
        let signalled = {
            let mut progress = lock(&self.progress);
            progress.opened = epoch;
            progress.signalled == epoch
        };
        signalled && self.establish()
    }

    fn establish(&self) -> bool {
        match self.apply(ConnectionEvent::Established) {
            Ok(_) => {
                lock(&self.backoff).reset();
                true
            }
            Err(err) => {
                debug!(error = %err, "Ignoring connected event");
                false
            }
        }
    }

    /// The connect attempt failed or the live connection dropped
    ///
    /// Enters Disconnected and schedules a reconnect unless the host asked for
    /// the disconnect or the engine is shut down.
    pub fn handle_transport_loss(self: &Arc<Self>, reason: &str) {
        if !self.lifecycle.is_alive() {
            return;
        }
        let change = match self.apply(ConnectionEvent::TransportFailed {
            reason: reason.to_string(),
        }) {
            Ok(change) => change,
            Err(err) => {
                debug!(error = %err, reason, "Ignoring transport loss");
                return;
            }
        };
        if change.cause.should_reconnect() && !self.explicit_disconnect.load(Ordering::Acquire) {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let (delay, attempt) = {
            let mut backoff = lock(&self.backoff);
            let delay = backoff.next_delay();
            (delay, backoff.attempt_count())
        };
        self.stats.record_reconnect_attempt();
        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

        let manager: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                if manager.explicit_disconnect.load(Ordering::Acquire) {
                    return;
                }
                debug!(attempt, "Reconnecting");
                manager.start_attempt();
            }
            .in_current_span(),
        );
        if let Some(previous) = lock(&self.reconnect_task).replace(task) {
            previous.abort();
        }
    }

    /// Tear down the transport and cancel any pending reconnect
    pub async fn disconnect(&self) {
        self.explicit_disconnect.store(true, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }
        if let Some(task) = lock(&self.connect_task).take() {
            task.abort();
        }

        if let Err(err) = self.apply(ConnectionEvent::Disconnect) {
            debug!(error = %err, "Already disconnected");
        }
        self.transport.close().await;
    }
}

impl core::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.transport.name())
            .field("state", &self.state())
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
