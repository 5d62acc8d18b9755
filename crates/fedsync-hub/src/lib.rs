//! The network-facing connection hub for federation members.
//!
//! Accepts WebSocket connections, drives each through the session state
//! machine (unauthenticated → authenticated → terminated), dispatches typed
//! frames, and exposes broadcast/unicast/heartbeat operations. Session
//! bookkeeping lives in [`SessionRegistry`]; admission is delegated to the
//! [`fedsync_handshake::HandshakeEngine`].

mod registry;
mod socket;
mod sweep;
mod sync;

pub use registry::{SessionRegistry, SessionSnapshot, SupersededSession};
pub use socket::ws_handler;
pub use sweep::start_liveness_sweep;
pub use sync::{MemorySyncStore, SyncStore, SyncStoreError};

use fedsync_handshake::HandshakeEngine;
use fedsync_types::FederationEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Timing knobs for the connection state machine.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// How long an unauthenticated connection may live before forced close.
    pub auth_timeout: Duration,
    /// Interval between liveness sweep passes.
    pub sweep_interval: Duration,
    /// Idle time after which an authenticated session is probed.
    pub probe_after: Duration,
    /// Idle ceiling after which an authenticated session is evicted.
    pub hard_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
            probe_after: Duration::from_secs(60),
            hard_timeout: Duration::from_secs(120),
        }
    }
}

/// Owns the live session set and everything needed to admit and serve
/// connections. Explicitly constructed and injected; nothing process-global.
pub struct ConnectionHub {
    pub registry: SessionRegistry,
    pub config: HubConfig,
    pub(crate) engine: Arc<HandshakeEngine>,
    pub(crate) store: Arc<dyn SyncStore>,
    pub(crate) events: broadcast::Sender<FederationEvent>,
}

impl ConnectionHub {
    pub fn new(
        engine: Arc<HandshakeEngine>,
        store: Arc<dyn SyncStore>,
        events: broadcast::Sender<FederationEvent>,
        config: HubConfig,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            config,
            engine,
            store,
            events,
        }
    }

    /// Handle to the sync collaborator, shared with the REST path.
    pub fn store(&self) -> Arc<dyn SyncStore> {
        self.store.clone()
    }

    /// Emission never blocks; a send with no receivers is expected when no
    /// observer is attached.
    pub(crate) fn emit(&self, event: FederationEvent) {
        if let Err(e) = self.events.send(event) {
            tracing::debug!("no event receivers: {}", e);
        }
    }
}
