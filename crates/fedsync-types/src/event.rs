//! Federation lifecycle events emitted for downstream dashboards/metrics.
//!
//! The security layer only emits these; it does not know or care who
//! consumes them. Delivery is over an explicit broadcast channel owned by
//! whoever constructs the hub.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a session was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The transport closed normally or dropped.
    Closed,
    /// No successful authentication arrived before the auth deadline.
    AuthTimeout,
    /// The liveness sweep evicted an unresponsive session.
    LivenessTimeout,
    /// A newer session authenticated with the same node id.
    Superseded,
    /// The handshake was rejected.
    AdmissionFailed,
}

/// Notifications emitted by the security layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum FederationEvent {
    /// A node completed the handshake and holds a live session.
    ConnectionEstablished { node_id: String, session_id: Uuid },

    /// A session was removed, for any reason.
    ConnectionTerminated {
        /// `None` when the session never authenticated.
        node_id: Option<String>,
        session_id: Uuid,
        reason: TerminationReason,
    },

    /// A sync submission was acknowledged by the persistence collaborator.
    SyncCompleted {
        node_id: String,
        sync_type: String,
        items_processed: u32,
    },

    /// A broadcast was fanned out.
    Broadcast { source: String, recipients: usize },
}
