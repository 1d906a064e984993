//! Transport Trait Definition
//!
//! The real-time transport is an external collaborator. The engine only needs
//! to open and close it; everything the transport observes comes back as
//! [`TransportEvent`](crate::channel::TransportEvent)s on the channel attached
//! at construction time.

use async_trait::async_trait;

use crate::channel::TransportEventSender;
use crate::errors::TransportError;

/// Common interface for real-time transports
///
/// ## Contract
///
/// - `attach_events` is called exactly once by the engine builder, before the
///   transport is shared.
/// - `open` starts a connection attempt. `Ok` means the attempt is underway;
///   the live connection is reported by sending `TransportEvent::Connected`.
///   `Err` means the attempt failed outright and is treated as a transport error.
/// - A dropped connection is reported with `TransportEvent::Disconnected`.
/// - `close` tears the connection down. Transports should not report the
///   resulting disconnect as an error.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attach the channel inbound events are delivered on
    fn attach_events(&mut self, events: TransportEventSender) -> Result<(), TransportError>;

    /// Begin a connection attempt
    async fn open(&self) -> Result<(), TransportError>;

    /// Close the connection
    async fn close(&self);

    /// Short name for logs
    fn name(&self) -> &str;
}
