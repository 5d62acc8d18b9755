//! The persistence collaborator consumed by the hub's sync path.
//!
//! The hub never talks to storage directly; it forwards sync submissions
//! through [`SyncStore`] and relays the acknowledgment. Acknowledgments are
//! idempotent under retry: the same message id yields the same ack without
//! duplicating downstream side effects.

use async_trait::async_trait;
use fedsync_types::SyncAck;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Errors surfaced by a sync collaborator.
#[derive(Debug, Error)]
pub enum SyncStoreError {
    #[error("sync store unavailable: {0}")]
    Unavailable(String),
}

/// Interface to the persistence/knowledge collaborator.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Records a sync submission, keyed by the caller-supplied message id.
    /// A duplicate id returns the originally produced ack unchanged.
    async fn record_sync(
        &self,
        node_id: &str,
        message_id: &str,
        sync_type: &str,
        items: &[serde_json::Value],
    ) -> Result<SyncAck, SyncStoreError>;

    /// Reflects a node's connectivity status downstream.
    async fn update_node_status(&self, node_id: &str, status: &str) -> Result<(), SyncStoreError>;
}

/// In-memory [`SyncStore`] backing tests and standalone deployments.
#[derive(Debug, Default)]
pub struct MemorySyncStore {
    acks: Mutex<HashMap<String, SyncAck>>,
    statuses: Mutex<HashMap<String, String>>,
    items_recorded: AtomicU64,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total items counted across all distinct submissions. Duplicates do
    /// not add to this.
    pub fn items_recorded(&self) -> u64 {
        self.items_recorded.load(Ordering::Relaxed)
    }

    /// Last reported status for a node, if any.
    pub fn status_of(&self, node_id: &str) -> Option<String> {
        lock_or_recover(&self.statuses).get(node_id).cloned()
    }
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn record_sync(
        &self,
        node_id: &str,
        message_id: &str,
        sync_type: &str,
        items: &[serde_json::Value],
    ) -> Result<SyncAck, SyncStoreError> {
        let mut acks = lock_or_recover(&self.acks);
        if let Some(existing) = acks.get(message_id) {
            tracing::debug!(
                node_id = %node_id,
                message_id = %message_id,
                "duplicate sync submission, replaying ack"
            );
            return Ok(existing.clone());
        }

        let ack = SyncAck {
            message_id: message_id.to_string(),
            status: "recorded".to_string(),
            items_processed: items.len() as u32,
        };
        self.items_recorded
            .fetch_add(items.len() as u64, Ordering::Relaxed);
        tracing::info!(
            node_id = %node_id,
            message_id = %message_id,
            sync_type = %sync_type,
            items = items.len(),
            "sync recorded"
        );
        acks.insert(message_id.to_string(), ack.clone());
        Ok(ack)
    }

    async fn update_node_status(&self, node_id: &str, status: &str) -> Result<(), SyncStoreError> {
        lock_or_recover(&self.statuses).insert(node_id.to_string(), status.to_string());
        Ok(())
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("sync store lock poisoned, recovering with stale state");
            poisoned.into_inner()
        }
    }
}
