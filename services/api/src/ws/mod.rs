//! WebSocket Session Management
//!
//! This module contains the logic for bridging a browser WebSocket to agent
//! instances:
//!
//! - `protocol`: Defines the JSON frames exchanged with the browser.
//! - `channels`: Adapts the socket halves to the agent's input and output contracts.
//! - `lifecycle`: Runs agent instances for a connection and reconnects on stream limits.
//! - `session`: Accepts the connection and negotiates the session.

pub mod channels;
pub mod lifecycle;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use session::ws_handler;
