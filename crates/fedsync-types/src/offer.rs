//! The signed connection offer exchanged during the handshake.

use serde::{Deserialize, Serialize};

/// A signed, timestamped, single-use assertion of identity that a node
/// presents to the hub when opening a connection.
///
/// The `signature` field is a hex-encoded Ed25519 signature over
/// [`HandshakeOffer::signable_bytes`]; the offer's `nonce` is recorded by
/// the hub on acceptance so the offer can never be consumed twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeOffer {
    /// Protocol version string; must match the hub's exactly.
    pub protocol_version: String,
    /// Identity claimed by the node.
    pub node_id: String,
    /// Declared role/category of the node (free-form tag).
    pub node_type: String,
    /// Declared capabilities, e.g. `["sync", "broadcast"]`.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Preferred compression scheme, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    /// Unix seconds at which the offer was built.
    pub timestamp: i64,
    /// Single-use random value for replay detection.
    pub nonce: String,
    /// Hex-encoded Ed25519 signature over the signable bytes.
    pub signature: String,
}

impl HandshakeOffer {
    /// Returns the canonical byte sequence covered by the signature.
    ///
    /// Every field (signature excluded) is length-prefixed as `len:value|`,
    /// and the capability list additionally carries its element count, so no
    /// field value can shift bytes into a neighbouring field. Signing a fixed
    /// byte layout rather than a re-serialized JSON object means whitespace
    /// or key-order differences between peers cannot break verification.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_field(&mut out, &self.protocol_version);
        push_field(&mut out, &self.node_id);
        push_field(&mut out, &self.node_type);
        push_field(&mut out, &self.timestamp.to_string());
        push_field(&mut out, &self.nonce);
        push_field(&mut out, &self.capabilities.len().to_string());
        for capability in &self.capabilities {
            push_field(&mut out, capability);
        }
        push_field(&mut out, self.compression.as_deref().unwrap_or(""));
        out
    }
}

fn push_field(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(value.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(value.as_bytes());
    out.push(b'|');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> HandshakeOffer {
        HandshakeOffer {
            protocol_version: "1.0".to_string(),
            node_id: "node-a".to_string(),
            node_type: "development".to_string(),
            capabilities: vec!["sync".to_string(), "broadcast".to_string()],
            compression: None,
            timestamp: 1_700_000_000,
            nonce: "abc123".to_string(),
            signature: String::new(),
        }
    }

    #[test]
    fn signable_bytes_exclude_signature() {
        let mut a = offer();
        let mut b = offer();
        a.signature = "aa".to_string();
        b.signature = "bb".to_string();
        assert_eq!(a.signable_bytes(), b.signable_bytes());
    }

    #[test]
    fn signable_bytes_cover_every_claim() {
        let base = offer().signable_bytes();

        let mut changed = offer();
        changed.node_id = "node-b".to_string();
        assert_ne!(base, changed.signable_bytes());

        let mut changed = offer();
        changed.timestamp += 1;
        assert_ne!(base, changed.signable_bytes());

        let mut changed = offer();
        changed.nonce = "different".to_string();
        assert_ne!(base, changed.signable_bytes());

        let mut changed = offer();
        changed.capabilities.pop();
        assert_ne!(base, changed.signable_bytes());
    }

    #[test]
    fn delimiter_characters_cannot_alias_adjacent_fields() {
        let mut a = offer();
        a.node_id = "node|dev".to_string();
        a.node_type = "x".to_string();
        let mut b = offer();
        b.node_id = "node".to_string();
        b.node_type = "dev|x".to_string();
        assert_ne!(a.signable_bytes(), b.signable_bytes());

        let mut a = offer();
        a.capabilities = vec!["sync,broadcast".to_string()];
        let mut b = offer();
        b.capabilities = vec!["sync".to_string(), "broadcast".to_string()];
        assert_ne!(a.signable_bytes(), b.signable_bytes());
    }

    #[test]
    fn offer_serializes_camel_case() {
        let json = serde_json::to_value(offer()).unwrap();
        assert!(json.get("protocolVersion").is_some());
        assert!(json.get("nodeId").is_some());
        assert!(json.get("nodeType").is_some());
        assert!(json.get("protocol_version").is_none());
    }
}
