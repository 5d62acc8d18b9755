//! Live-session bookkeeping.
//!
//! One [`SessionRegistry`] owns every live connection's authentication
//! state and liveness timestamps. Lock ordering throughout is
//! `sessions → by_node`; all sections hold locks only for map operations
//! and never across an `.await` on anything slower than `try_send`.

use fedsync_types::HubFrame;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, RwLock};
use uuid::Uuid;

struct SessionEntry {
    /// Set exactly when the session authenticates; `Some` iff authenticated.
    node_id: Option<String>,
    node_type: Option<String>,
    connected_at: Instant,
    last_activity: Instant,
    last_heartbeat: Instant,
    outbound: mpsc::Sender<String>,
    close: Arc<Notify>,
}

impl SessionEntry {
    /// Idle time measured from the most recent sign of life, so a node
    /// that syncs constantly but never heartbeats is not falsely evicted.
    fn idle(&self, now: Instant) -> Duration {
        let freshest = self.last_activity.max(self.last_heartbeat);
        now.saturating_duration_since(freshest)
    }
}

/// Error from [`SessionRegistry::authenticate`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthenticateError {
    #[error("session no longer registered")]
    UnknownSession,
}

/// The prior session displaced by a re-authentication of the same node id.
#[derive(Debug)]
pub struct SupersededSession {
    pub session_id: Uuid,
    pub node_id: String,
    pub(crate) close: Arc<Notify>,
}

impl SupersededSession {
    /// Signals the displaced connection's task to shut down.
    pub fn close(&self) {
        self.close.notify_one();
    }
}

/// Point-in-time view of one session, for status listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub node_id: Option<String>,
    pub node_type: Option<String>,
    pub authenticated: bool,
    pub connected_secs: u64,
    pub idle_secs: u64,
}

/// Owns the set of live connections.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    by_node: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted, unauthenticated connection.
    ///
    /// Returns the new session id and the close signal the connection task
    /// must select on.
    pub async fn add_unauthenticated(&self, outbound: mpsc::Sender<String>) -> (Uuid, Arc<Notify>) {
        let session_id = Uuid::new_v4();
        let close = Arc::new(Notify::new());
        let now = Instant::now();
        self.sessions.write().await.insert(
            session_id,
            SessionEntry {
                node_id: None,
                node_type: None,
                connected_at: now,
                last_activity: now,
                last_heartbeat: now,
                outbound,
                close: close.clone(),
            },
        );
        (session_id, close)
    }

    /// Promotes a session to authenticated under `node_id`, re-keying it
    /// to the session id minted by the handshake grant.
    ///
    /// Enforces the single-identity invariant: if another live session
    /// already holds `node_id`, that session is unregistered here (under
    /// the same write locks) and returned so the caller can close its
    /// transport and report the supersession.
    ///
    /// Returns [`AuthenticateError::UnknownSession`] when the provisional
    /// session vanished between handshake verification and promotion.
    pub async fn authenticate(
        &self,
        provisional_id: Uuid,
        granted_id: Uuid,
        node_id: &str,
        node_type: &str,
    ) -> Result<Option<SupersededSession>, AuthenticateError> {
        let mut sessions = self.sessions.write().await;
        let mut by_node = self.by_node.write().await;

        let Some(mut entry) = sessions.remove(&provisional_id) else {
            return Err(AuthenticateError::UnknownSession);
        };

        let superseded = match by_node.get(node_id) {
            Some(&old_id) if old_id != provisional_id => {
                sessions.remove(&old_id).map(|old| SupersededSession {
                    session_id: old_id,
                    node_id: node_id.to_string(),
                    close: old.close,
                })
            }
            _ => None,
        };

        entry.node_id = Some(node_id.to_string());
        entry.node_type = Some(node_type.to_string());
        entry.last_activity = Instant::now();
        sessions.insert(granted_id, entry);
        by_node.insert(node_id.to_string(), granted_id);

        Ok(superseded)
    }

    pub async fn touch_activity(&self, session_id: Uuid) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session_id) {
            entry.last_activity = Instant::now();
        }
    }

    pub async fn touch_heartbeat(&self, session_id: Uuid) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session_id) {
            entry.last_heartbeat = Instant::now();
            entry.last_activity = entry.last_heartbeat;
        }
    }

    /// Removes a session. Idempotent: removing an already-removed session
    /// is a no-op returning `None`. On removal, returns the node id the
    /// session held (if authenticated) so the caller can report it.
    pub async fn remove(&self, session_id: Uuid) -> Option<Option<String>> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.remove(&session_id)?;
        if let Some(ref node_id) = entry.node_id {
            let mut by_node = self.by_node.write().await;
            // Only clear the index if it still points at us; a superseding
            // session may already own the node id.
            if by_node.get(node_id) == Some(&session_id) {
                by_node.remove(node_id);
            }
        }
        Some(entry.node_id)
    }

    /// Signals a session's connection task to shut down. A no-op for
    /// unknown ids.
    pub async fn close_session(&self, session_id: Uuid) {
        if let Some(entry) = self.sessions.read().await.get(&session_id) {
            entry.close.notify_one();
        }
    }

    /// Sends a frame to one node. Returns false if the node has no live
    /// authenticated session or its outbound buffer is full.
    pub async fn send_to_node(&self, node_id: &str, frame_json: String) -> bool {
        let target = { self.by_node.read().await.get(node_id).copied() };
        let Some(session_id) = target else {
            return false;
        };
        let sessions = self.sessions.read().await;
        match sessions.get(&session_id) {
            Some(entry) => match entry.outbound.try_send(frame_json) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        node_id = %node_id,
                        "dropping frame for slow consumer: {}",
                        e
                    );
                    false
                }
            },
            None => false,
        }
    }

    /// Fans a frame out to every authenticated session except `exclude`.
    /// Returns the number of recipients the frame was queued for.
    pub async fn broadcast(&self, frame_json: String, exclude: Option<Uuid>) -> usize {
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for (id, entry) in sessions.iter() {
            if entry.node_id.is_none() || Some(*id) == exclude {
                continue;
            }
            match entry.outbound.try_send(frame_json.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        session_id = %id,
                        "dropping broadcast frame for slow consumer: {}",
                        e
                    );
                }
            }
        }
        delivered
    }

    /// One liveness pass: probe authenticated sessions idle beyond
    /// `probe_after`, evict those idle beyond `hard_timeout`.
    ///
    /// Evicted sessions are closed and unregistered here; the caller emits
    /// the termination events. Safe to run concurrently with connection
    /// tasks — removal is idempotent on both sides.
    pub async fn liveness_pass(
        &self,
        probe_after: Duration,
        hard_timeout: Duration,
    ) -> Vec<(Uuid, Option<String>)> {
        let now = Instant::now();
        let mut to_evict = Vec::new();

        {
            let sessions = self.sessions.read().await;
            for (id, entry) in sessions.iter() {
                if entry.node_id.is_none() {
                    // Unauthenticated sessions are bounded by the auth
                    // deadline, not the sweep.
                    continue;
                }
                let idle = entry.idle(now);
                if idle >= hard_timeout {
                    to_evict.push(*id);
                } else if idle >= probe_after {
                    if let Ok(json) = serde_json::to_string(&HubFrame::HeartbeatProbe) {
                        if entry.outbound.try_send(json).is_err() {
                            tracing::warn!(session_id = %id, "heartbeat probe not deliverable");
                        }
                    }
                }
            }
        }

        let mut evicted = Vec::new();
        for id in to_evict {
            self.close_session(id).await;
            if let Some(node_id) = self.remove(id).await {
                evicted.push((id, node_id));
            }
        }
        evicted
    }

    /// Snapshot of every live session.
    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let now = Instant::now();
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .map(|(id, entry)| SessionSnapshot {
                session_id: *id,
                node_id: entry.node_id.clone(),
                node_type: entry.node_type.clone(),
                authenticated: entry.node_id.is_some(),
                connected_secs: now.saturating_duration_since(entry.connected_at).as_secs(),
                idle_secs: entry.idle(now).as_secs(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(16)
    }

    /// Promotes a session in place, keeping the provisional id as the
    /// granted id for test brevity.
    async fn promote(registry: &SessionRegistry, id: Uuid, node: &str) -> Option<SupersededSession> {
        registry.authenticate(id, id, node, "development").await.unwrap()
    }

    #[tokio::test]
    async fn authenticate_rekeys_to_granted_id() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        let (provisional, _close) = registry.add_unauthenticated(tx).await;
        let granted = Uuid::new_v4();

        let superseded = registry
            .authenticate(provisional, granted, "n1", "development")
            .await
            .unwrap();
        assert!(superseded.is_none());

        let snap = registry.snapshot().await;
        assert_eq!(snap.len(), 1);
        assert!(snap[0].authenticated);
        assert_eq!(snap[0].session_id, granted);
        assert_eq!(snap[0].node_id.as_deref(), Some("n1"));
        assert!(registry.send_to_node("n1", "ping".to_string()).await);
    }

    #[tokio::test]
    async fn authenticate_unknown_session_errors() {
        let registry = SessionRegistry::new();
        let err = registry
            .authenticate(Uuid::new_v4(), Uuid::new_v4(), "n1", "development")
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticateError::UnknownSession);
    }

    #[tokio::test]
    async fn second_authentication_supersedes_first() {
        let registry = SessionRegistry::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        let (a, _) = registry.add_unauthenticated(tx_a).await;
        let (b, _) = registry.add_unauthenticated(tx_b).await;

        assert!(promote(&registry, a, "n1").await.is_none());
        let superseded = promote(&registry, b, "n1").await.unwrap();
        assert_eq!(superseded.session_id, a);
        assert_eq!(superseded.node_id, "n1");

        // Only B remains, and the node index points at it.
        assert_eq!(registry.len().await, 1);
        let snap = registry.snapshot().await;
        assert_eq!(snap[0].session_id, b);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_clears_index() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        let (id, _) = registry.add_unauthenticated(tx).await;
        promote(&registry, id, "n1").await;

        assert_eq!(registry.remove(id).await, Some(Some("n1".to_string())));
        assert_eq!(registry.remove(id).await, None);
        assert!(!registry.send_to_node("n1", "ping".to_string()).await);
    }

    #[tokio::test]
    async fn superseded_session_removal_keeps_new_index() {
        let registry = SessionRegistry::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        let (a, _) = registry.add_unauthenticated(tx_a).await;
        let (b, _) = registry.add_unauthenticated(tx_b).await;
        promote(&registry, a, "n1").await;
        promote(&registry, b, "n1").await;

        // The displaced task's cleanup must not evict B's index entry.
        assert_eq!(registry.remove(a).await, None);
        assert!(registry.send_to_node("n1", "ping".to_string()).await);
    }

    #[tokio::test]
    async fn broadcast_skips_sender_and_unauthenticated() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let (tx_c, mut rx_c) = channel();
        let (a, _) = registry.add_unauthenticated(tx_a).await;
        let (b, _) = registry.add_unauthenticated(tx_b).await;
        let (_c, _) = registry.add_unauthenticated(tx_c).await;
        promote(&registry, a, "n1").await;
        promote(&registry, b, "n2").await;
        // c never authenticates.

        let delivered = registry.broadcast("hello".to_string(), Some(a)).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_b.try_recv().unwrap(), "hello");
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn liveness_pass_probes_then_evicts() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = channel();
        let (id, _) = registry.add_unauthenticated(tx).await;
        promote(&registry, id, "n1").await;

        // Fresh session: untouched.
        let evicted = registry
            .liveness_pass(Duration::from_millis(50), Duration::from_millis(200))
            .await;
        assert!(evicted.is_empty());
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let evicted = registry
            .liveness_pass(Duration::from_millis(50), Duration::from_millis(200))
            .await;
        assert!(evicted.is_empty());
        let probe = rx.try_recv().unwrap();
        assert!(probe.contains("heartbeatProbe"), "got {}", probe);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let evicted = registry
            .liveness_pass(Duration::from_millis(50), Duration::from_millis(200))
            .await;
        assert_eq!(evicted, vec![(id, Some("n1".to_string()))]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn heartbeat_refresh_defers_eviction() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();
        let (id, _) = registry.add_unauthenticated(tx).await;
        promote(&registry, id, "n1").await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        registry.touch_heartbeat(id).await;

        let evicted = registry
            .liveness_pass(Duration::from_millis(50), Duration::from_millis(100))
            .await;
        assert!(evicted.is_empty(), "refreshed session must survive");
    }
}
