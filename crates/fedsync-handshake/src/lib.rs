//! Handshake admission for the fedsync hub.
//!
//! The [`HandshakeEngine`] builds outbound connection offers and validates
//! inbound offers, issuing a session grant (session id, bearer token, fresh
//! signing secret) on success. Validation is ordered and fail-fast; every
//! failure maps to a distinct internal reason while the externally visible
//! message stays generic.
//!
//! Offers are signed with Ed25519 over a canonical byte layout; node public
//! keys are provisioned out of band into the [`NodeKeyDirectory`].

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use fedsync_auth::{NonceLedger, TokenIssuer};
use fedsync_types::{FederationEvent, HandshakeOffer, ReasonCode};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// The protocol version this engine speaks. No negotiation: an offer with
/// any other version is rejected outright.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Everything a node needs to run an authenticated session.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    /// Bearer token bound to this session and node identity.
    pub token: String,
    /// Fresh per-session shared secret (hex) for message signing.
    pub session_secret: String,
    /// Unix seconds at which the token expires.
    pub expires_at: i64,
}

/// Why an offer was rejected. Internal only; the external response carries
/// the [`ReasonCode`] and a generic message so a caller probing the
/// handshake cannot distinguish "unknown node" from "bad signature".
#[derive(Debug, Error)]
pub enum HandshakeRejection {
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: String, got: String },
    #[error("offer timestamp outside freshness window ({skew_secs}s skew)")]
    StaleTimestamp { skew_secs: i64 },
    #[error("offer nonce already consumed")]
    ReplayDetected,
    #[error("no provisioned key for node {0}")]
    UnknownNode(String),
    #[error("offer signature verification failed")]
    InvalidSignature,
}

impl HandshakeRejection {
    /// The stable code surfaced to the counterparty.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::VersionMismatch { .. } => ReasonCode::VersionMismatch,
            Self::StaleTimestamp { .. } => ReasonCode::StaleTimestamp,
            Self::ReplayDetected => ReasonCode::ReplayDetected,
            // An unknown node and a bad signature are indistinguishable
            // externally; the distinction lives in server logs only.
            Self::UnknownNode(_) => ReasonCode::InvalidSignature,
            Self::InvalidSignature => ReasonCode::InvalidSignature,
        }
    }

    /// Generic text safe to send to the counterparty.
    pub fn public_message(&self) -> &'static str {
        "handshake rejected"
    }
}

/// Node public keys provisioned out of band.
#[derive(Debug, Default)]
pub struct NodeKeyDirectory {
    keys: RwLock<HashMap<String, VerifyingKey>>,
}

impl NodeKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node_id: impl Into<String>, key: VerifyingKey) {
        self.write().insert(node_id.into(), key);
    }

    pub fn remove(&self, node_id: &str) {
        self.write().remove(node_id);
    }

    pub fn get(&self, node_id: &str) -> Option<VerifyingKey> {
        match self.keys.read() {
            Ok(keys) => keys.get(node_id).copied(),
            Err(poisoned) => poisoned.into_inner().get(node_id).copied(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, VerifyingKey>> {
        match self.keys.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Builds and validates handshake offers.
pub struct HandshakeEngine {
    freshness_window: Duration,
    token_ttl: Duration,
    nonces: Arc<NonceLedger>,
    keys: Arc<NodeKeyDirectory>,
    issuer: TokenIssuer,
    events: broadcast::Sender<FederationEvent>,
}

impl HandshakeEngine {
    pub fn new(
        freshness_window: Duration,
        token_ttl: Duration,
        nonces: Arc<NonceLedger>,
        keys: Arc<NodeKeyDirectory>,
        issuer: TokenIssuer,
        events: broadcast::Sender<FederationEvent>,
    ) -> Self {
        Self {
            freshness_window,
            token_ttl,
            nonces,
            keys,
            issuer,
            events,
        }
    }

    /// Handle to the provisioned key directory, for runtime registration.
    pub fn keys(&self) -> Arc<NodeKeyDirectory> {
        self.keys.clone()
    }

    /// Validates an inbound offer and, on success, mints a session grant
    /// and records the offer's nonce so it can never be consumed again.
    ///
    /// Checks run in order, first failure short-circuits:
    /// version, timestamp freshness, nonce replay, Ed25519 signature.
    /// Rejections are never retried by the engine; retry policy belongs to
    /// the caller.
    pub fn verify_offer(&self, offer: &HandshakeOffer) -> Result<SessionGrant, HandshakeRejection> {
        if offer.protocol_version != PROTOCOL_VERSION {
            return Err(HandshakeRejection::VersionMismatch {
                expected: PROTOCOL_VERSION.to_string(),
                got: offer.protocol_version.clone(),
            });
        }

        let skew_secs = (chrono::Utc::now().timestamp() - offer.timestamp).abs();
        if skew_secs > self.freshness_window.as_secs() as i64 {
            return Err(HandshakeRejection::StaleTimestamp { skew_secs });
        }

        if self.nonces.contains(&offer.nonce) {
            return Err(HandshakeRejection::ReplayDetected);
        }

        let key = self
            .keys
            .get(&offer.node_id)
            .ok_or_else(|| HandshakeRejection::UnknownNode(offer.node_id.clone()))?;

        let signature_bytes =
            hex::decode(&offer.signature).map_err(|_| HandshakeRejection::InvalidSignature)?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| HandshakeRejection::InvalidSignature)?;
        key.verify(&offer.signable_bytes(), &signature)
            .map_err(|_| HandshakeRejection::InvalidSignature)?;

        let session_id = Uuid::new_v4();
        let token = self.issuer.issue(&offer.node_id, self.token_ttl);
        let session_secret = random_hex(32);
        let expires_at = chrono::Utc::now().timestamp() + self.token_ttl.as_secs() as i64;

        self.nonces.record(offer.nonce.clone());

        tracing::info!(
            node_id = %offer.node_id,
            session_id = %session_id,
            node_type = %offer.node_type,
            "handshake accepted"
        );

        if let Err(e) = self.events.send(FederationEvent::ConnectionEstablished {
            node_id: offer.node_id.clone(),
            session_id,
        }) {
            tracing::debug!("no event receivers for connection-established: {}", e);
        }

        Ok(SessionGrant {
            session_id,
            node_id: offer.node_id.clone(),
            node_type: offer.node_type.clone(),
            token,
            session_secret,
            expires_at,
        })
    }
}

/// Builds a signed offer for `node_id`. Used by federation members (and
/// tests) to open a connection.
pub fn build_offer(
    signing_key: &SigningKey,
    node_id: impl Into<String>,
    node_type: impl Into<String>,
    capabilities: Vec<String>,
    compression: Option<String>,
) -> HandshakeOffer {
    let mut offer = HandshakeOffer {
        protocol_version: PROTOCOL_VERSION.to_string(),
        node_id: node_id.into(),
        node_type: node_type.into(),
        capabilities,
        compression,
        timestamp: chrono::Utc::now().timestamp(),
        nonce: random_hex(16),
        signature: String::new(),
    };
    offer.signature = hex::encode(signing_key.sign(&offer.signable_bytes()).to_bytes());
    offer
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
