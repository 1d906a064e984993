//! chatsync Harness
//!
//! Scriptable in-process collaborators for the chatsync engine: a transport
//! the test drives by hand and a message API backed by in-memory demo data.
//! Used by the runtime's tests and by the `chatsync` CLI.

pub mod api;
pub mod transport;

pub use api::{seed_data, MockMessageApi};
pub use transport::MockTransport;
