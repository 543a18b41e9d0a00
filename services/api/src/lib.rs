//! Voice Ops API Library Crate
//!
//! This library contains the WebSocket bridge between the browser and the AWS
//! voice assistant: configuration, application state, routing and the
//! per-connection session logic. The `api` binary is a thin wrapper around it.

pub mod config;
pub mod router;
pub mod state;
pub mod ws;
