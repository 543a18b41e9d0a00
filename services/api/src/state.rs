//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the resources every
//! connection shares: the agent factory, the history store and the immutable
//! process configuration.

use crate::ws::lifecycle::LifecycleSettings;
use std::sync::Arc;
use voiceops_core::{agent::AgentFactory, agent::ModelConfig, history::HistoryStore};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub agents: Arc<dyn AgentFactory>,
    pub history: Arc<dyn HistoryStore>,
    pub system_prompt: Arc<String>,
    /// Model settings every session starts from; only the voice is negotiated.
    pub defaults: ModelConfig,
    pub lifecycle: LifecycleSettings,
}
