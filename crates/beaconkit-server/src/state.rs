//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use beaconkit_core::{Config, EngineHandle, IdentityConstraint};
use tokio::sync::RwLock;

/// Shared application state, cloned into every handler.
pub type SharedState = Arc<RwLock<AppState>>;

/// Application state.
#[derive(Debug)]
pub struct AppState {
    /// Loaded configuration. `watch` tracks the constraints requested at
    /// startup and through the API since.
    pub config: Config,

    /// Handle to the running proximity engine.
    pub engine: EngineHandle,

    /// When the server started.
    pub started_at: Instant,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config, engine: EngineHandle) -> Self {
        Self {
            config,
            engine,
            started_at: Instant::now(),
        }
    }

    /// Wrap into the shared form handlers receive.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Record a watched constraint in the configured watch list.
    pub fn remember_watch(&mut self, constraint: IdentityConstraint) {
        if !self.config.watch.contains(&constraint) {
            self.config.watch.push(constraint);
        }
    }

    /// Server uptime in seconds.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}


#[cfg(test)]
mod tests {
    use beaconkit_core::IdentityConstraint;
    use uuid::Uuid;

    use super::test_support::powered_state;

    #[tokio::test]
    async fn test_remember_watch_deduplicates() {
        let (state, _sink) = powered_state().await;
        let c = IdentityConstraint::new(Uuid::from_u128(1));

        let mut guard = state.write().await;
        guard.remember_watch(c);
        guard.remember_watch(c);

        assert_eq!(guard.config.watch, vec![c]);
    }
}
