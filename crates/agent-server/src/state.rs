//! Application State

use std::sync::Arc;

use agent_core::{Orchestrator, ProviderRouter, SessionStore, compaction::Compactor};

use crate::config::ServerConfig;
use crate::locks::SessionLocks;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Agentic loop over the routed provider, built-in tools and the store
    pub orchestrator: Orchestrator,

    /// Registered providers, for listing and health
    pub providers: Arc<ProviderRouter>,

    pub compactor: Arc<Compactor>,

    /// Busy sessions
    pub locks: SessionLocks,

    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, providers: Arc<ProviderRouter>, config: ServerConfig) -> Self {
        let compactor = Arc::new(Compactor::new(orchestrator.store().clone()));
        Self {
            orchestrator,
            providers,
            compactor,
            locks: SessionLocks::new(),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.orchestrator.store()
    }
}
