//! Connection State Machine
//!
//! ```text
//! Disconnected --Connect--> Connecting --Established--> Connected
//! Connecting | Connected --TransportFailed | Disconnect--> Disconnected
//! ```
//!
//! Transitions are pure: [`ConnectionState::transition`] consumes the current
//! state and an event and returns the resulting [`StateChange`], or an error for
//! combinations the machine does not accept. Side effects (opening the transport,
//! scheduling reconnects, notifying listeners) belong to the runtime's
//! connection manager.

use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Transport connection state, one per engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Process an event and compute the next state (consumes self)
    pub fn transition(self, event: ConnectionEvent) -> Result<StateChange, StateTransitionError> {
        let (to, cause) = match (self, &event) {
            (ConnectionState::Disconnected, ConnectionEvent::Connect) => {
                (ConnectionState::Connecting, TransitionCause::ConnectRequested)
            }
            (ConnectionState::Connecting, ConnectionEvent::Established) => {
                (ConnectionState::Connected, TransitionCause::TransportEstablished)
            }
            (
                ConnectionState::Connecting | ConnectionState::Connected,
                ConnectionEvent::TransportFailed { reason },
            ) => (
                ConnectionState::Disconnected,
                TransitionCause::TransportError {
                    reason: reason.clone(),
                },
            ),
            (ConnectionState::Connecting | ConnectionState::Connected, ConnectionEvent::Disconnect) => {
                (ConnectionState::Disconnected, TransitionCause::ExplicitDisconnect)
            }
            (from, _) => {
                return Err(StateTransitionError {
                    from,
                    event: event.event_name(),
                })
            }
        };

        Ok(StateChange {
            from: self,
            to,
            cause,
        })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

// ----------------------------------------------------------------------------
// Events and Transitions
// ----------------------------------------------------------------------------

/// Inputs accepted by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt was started
    Connect,
    /// The transport reported a live connection
    Established,
    /// Connect attempt failed or a live connection dropped
    TransportFailed { reason: String },
    /// Explicit teardown requested by the host
    Disconnect,
}

impl ConnectionEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connect => "Connect",
            ConnectionEvent::Established => "Established",
            ConnectionEvent::TransportFailed { .. } => "TransportFailed",
            ConnectionEvent::Disconnect => "Disconnect",
        }
    }
}

/// Why a transition happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionCause {
    ConnectRequested,
    TransportEstablished,
    TransportError { reason: String },
    ExplicitDisconnect,
}

impl TransitionCause {
    /// Unexpected drops are retried; explicit disconnects are not
    pub fn should_reconnect(&self) -> bool {
        matches!(self, TransitionCause::TransportError { .. })
    }
}

/// A completed transition, handed to state listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub cause: TransitionCause,
}

/// Event not accepted in the current state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition from {from} on {event}")]
pub struct StateTransitionError {
    pub from: ConnectionState,
    pub event: &'static str,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lost() -> ConnectionEvent {
        ConnectionEvent::TransportFailed {
            reason: "socket reset".into(),
        }
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_happy_path() {
        let change = ConnectionState::Disconnected
            .transition(ConnectionEvent::Connect)
            .unwrap();
        assert_eq!(change.to, ConnectionState::Connecting);

        let change = change.to.transition(ConnectionEvent::Established).unwrap();
        assert_eq!(change.to, ConnectionState::Connected);
        assert_eq!(change.cause, TransitionCause::TransportEstablished);
    }

    #[test]
    fn test_transport_failure_requests_reconnect() {
        for from in [ConnectionState::Connecting, ConnectionState::Connected] {
            let change = from.transition(lost()).unwrap();
            assert_eq!(change.to, ConnectionState::Disconnected);
            assert!(change.cause.should_reconnect());
        }
    }

    #[test]
    fn test_explicit_disconnect_does_not_reconnect() {
        let change = ConnectionState::Connected
            .transition(ConnectionEvent::Disconnect)
            .unwrap();
        assert_eq!(change.to, ConnectionState::Disconnected);
        assert!(!change.cause.should_reconnect());
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(ConnectionState::Disconnected.transition(lost()).is_err());
        assert!(ConnectionState::Disconnected
            .transition(ConnectionEvent::Established)
            .is_err());
        assert!(ConnectionState::Connected
            .transition(ConnectionEvent::Connect)
            .is_err());
        let err = ConnectionState::Connected
            .transition(ConnectionEvent::Established)
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid transition from Connected on Established");
    }
}
