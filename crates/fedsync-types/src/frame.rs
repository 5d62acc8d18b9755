//! Wire frames for the hub-to-node WebSocket channel.
//!
//! Both directions are closed tagged enums so routing and the compiler
//! jointly enforce that every frame kind is handled. Field names follow the
//! camelCase wire convention of the node clients.

use crate::{HandshakeOffer, ReasonCode};
use serde::{Deserialize, Serialize};

/// Frames a node sends to the hub.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum NodeFrame {
    /// The handshake message; the only frame accepted before authentication.
    #[serde(rename = "auth")]
    Auth { offer: HandshakeOffer },

    /// Liveness signal; always acknowledged.
    #[serde(rename = "heartbeat")]
    Heartbeat,

    /// A synchronization submission, forwarded to the persistence
    /// collaborator. `messageId` keys the idempotent acknowledgment.
    #[serde(rename = "sync")]
    Sync {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "syncType")]
        sync_type: String,
        #[serde(default)]
        items: Vec<serde_json::Value>,
    },

    /// Fan-out to other authenticated sessions, or a single target node.
    #[serde(rename = "broadcast")]
    Broadcast {
        payload: serde_json::Value,
        /// Deliver only to this node instead of fanning out.
        #[serde(default)]
        target: Option<String>,
        /// Exclude the sender from the fan-out.
        #[serde(rename = "excludeSelf", default)]
        exclude_self: bool,
    },
}

/// Frames the hub sends to a node.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum HubFrame {
    /// Sent immediately after transport accept, before authentication.
    #[serde(rename = "challenge")]
    Challenge {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Positive acknowledgment; echoes the triggering message's id when
    /// the sender supplied one.
    #[serde(rename = "ack")]
    Ack {
        #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
        payload: serde_json::Value,
    },

    /// Typed rejection; the connection may or may not survive depending on
    /// the code (admission failures are terminal, authorization failures
    /// are not).
    #[serde(rename = "error")]
    Error { code: ReasonCode, message: String },

    /// Proactive liveness probe from the sweep; nodes answer with a
    /// heartbeat frame.
    #[serde(rename = "heartbeatProbe")]
    HeartbeatProbe,

    /// A broadcast relayed from another node.
    #[serde(rename = "broadcast")]
    Broadcast {
        source: String,
        payload: serde_json::Value,
    },
}

/// Acknowledgment returned by the persistence collaborator for a sync
/// submission. Identical message ids yield byte-identical acks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAck {
    pub message_id: String,
    pub status: String,
    pub items_processed: u32,
}
