//! Periodic liveness sweep over the session set.

use crate::ConnectionHub;
use fedsync_types::{FederationEvent, TerminationReason};
use std::sync::Arc;

/// Runs forever: every `sweep_interval`, probe idle sessions and evict the
/// unresponsive ones. Spawn with `tokio::spawn`; aborts with the runtime.
pub async fn start_liveness_sweep(hub: Arc<ConnectionHub>) {
    let mut interval = tokio::time::interval(hub.config.sweep_interval);
    // The first tick fires immediately; skip it so a fresh server does not
    // sweep an empty registry at startup.
    interval.tick().await;

    loop {
        interval.tick().await;
        let evicted = hub
            .registry
            .liveness_pass(hub.config.probe_after, hub.config.hard_timeout)
            .await;

        for (session_id, node_id) in evicted {
            tracing::info!(
                session_id = %session_id,
                node_id = node_id.as_deref().unwrap_or("-"),
                "evicted unresponsive session"
            );
            if let Some(ref node) = node_id {
                if let Err(e) = hub.store.update_node_status(node, "offline").await {
                    tracing::warn!(node_id = %node, "failed to report offline status: {}", e);
                }
            }
            hub.emit(FederationEvent::ConnectionTerminated {
                node_id,
                session_id,
                reason: TerminationReason::LivenessTimeout,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HubConfig, MemorySyncStore};
    use ed25519_dalek::SigningKey;
    use fedsync_auth::{NonceLedger, TokenIssuer};
    use fedsync_handshake::HandshakeEngine;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};
    use uuid::Uuid;

    fn hub_with(
        config: HubConfig,
    ) -> (
        Arc<ConnectionHub>,
        Arc<MemorySyncStore>,
        broadcast::Receiver<FederationEvent>,
    ) {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let keys = Arc::new(fedsync_handshake::NodeKeyDirectory::new());
        keys.register("node-a", signing_key.verifying_key());

        let (events, events_rx) = broadcast::channel(32);
        let engine = Arc::new(HandshakeEngine::new(
            Duration::from_secs(300),
            Duration::from_secs(3600),
            Arc::new(NonceLedger::new(Duration::from_secs(300))),
            keys,
            TokenIssuer::new(b"sweep-test-key".to_vec()),
            events.clone(),
        ));
        let store = Arc::new(MemorySyncStore::new());
        (
            Arc::new(ConnectionHub::new(engine, store.clone(), events, config)),
            store,
            events_rx,
        )
    }

    #[tokio::test]
    async fn sweep_evicts_silent_session_and_reports_it() {
        let (hub, store, mut events) = hub_with(HubConfig {
            auth_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(30),
            probe_after: Duration::from_millis(20),
            hard_timeout: Duration::from_millis(50),
        });

        let (tx, _rx) = mpsc::channel(16);
        let (id, _close) = hub.registry.add_unauthenticated(tx).await;
        hub.registry
            .authenticate(id, Uuid::new_v4(), "node-a", "development")
            .await
            .unwrap();

        let sweeper = tokio::spawn(start_liveness_sweep(hub.clone()));

        let event = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(FederationEvent::ConnectionTerminated {
                    node_id, reason, ..
                }) = events.recv().await
                {
                    return (node_id, reason);
                }
            }
        })
        .await
        .expect("eviction event within the deadline");

        assert_eq!(event.0.as_deref(), Some("node-a"));
        assert_eq!(event.1, TerminationReason::LivenessTimeout);
        assert!(hub.registry.is_empty().await);
        assert_eq!(store.status_of("node-a"), Some("offline".to_string()));

        sweeper.abort();
    }
}
