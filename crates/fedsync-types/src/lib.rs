//! Shared types, error codes, and wire frames for the fedsync platform.
//!
//! This crate provides the foundational types used across all fedsync crates:
//! the stable rejection reason codes, the WebSocket frame enums for the
//! hub-to-node channel, the handshake offer, registered-platform records for
//! the REST gateway, and the federation event types.
//!
//! No crate in the workspace depends on anything *except* `fedsync-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

mod event;
mod frame;
mod offer;
mod platform;

pub use event::{FederationEvent, TerminationReason};
pub use frame::{HubFrame, NodeFrame, SyncAck};
pub use offer::HandshakeOffer;
pub use platform::{RateLimitProfile, RegisteredPlatform};

use serde::{Deserialize, Serialize};

/// Stable machine-readable reason codes attached to every rejection.
///
/// Calling layers render distinct user-facing messages from these codes
/// without re-deriving cause from prose text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// The offer's protocol version does not match the hub's.
    VersionMismatch,
    /// A timestamp fell outside the freshness window.
    StaleTimestamp,
    /// A nonce was seen before within the replay window.
    ReplayDetected,
    /// A token, API key, or message signature failed verification.
    InvalidSignature,
    /// The caller is not (yet) authenticated, or required credentials
    /// are missing.
    Unauthenticated,
    /// The platform identifier is unknown or the platform is inactive.
    UnknownPlatform,
    /// The requested path is not on the platform's allow-list.
    ForbiddenEndpoint,
    /// A rate-limit window has no remaining capacity.
    RateLimited,
    /// A frame could not be parsed or is not valid in the current state.
    MalformedMessage,
    /// An unexpected internal fault; the specific cause is in server logs.
    InternalError,
}

impl ReasonCode {
    /// Returns the canonical string label for this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VersionMismatch => "version_mismatch",
            Self::StaleTimestamp => "stale_timestamp",
            Self::ReplayDetected => "replay_detected",
            Self::InvalidSignature => "invalid_signature",
            Self::Unauthenticated => "unauthenticated",
            Self::UnknownPlatform => "unknown_platform",
            Self::ForbiddenEndpoint => "forbidden_endpoint",
            Self::RateLimited => "rate_limited",
            Self::MalformedMessage => "malformed_message",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReasonCode {
    type Err = ParseReasonCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "version_mismatch" => Ok(Self::VersionMismatch),
            "stale_timestamp" => Ok(Self::StaleTimestamp),
            "replay_detected" => Ok(Self::ReplayDetected),
            "invalid_signature" => Ok(Self::InvalidSignature),
            "unauthenticated" => Ok(Self::Unauthenticated),
            "unknown_platform" => Ok(Self::UnknownPlatform),
            "forbidden_endpoint" => Ok(Self::ForbiddenEndpoint),
            "rate_limited" => Ok(Self::RateLimited),
            "malformed_message" => Ok(Self::MalformedMessage),
            "internal_error" => Ok(Self::InternalError),
            _ => Err(ParseReasonCodeError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown reason code string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown reason code: {0}")]
pub struct ParseReasonCodeError(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn reason_code_round_trips_through_str() {
        let codes = [
            ReasonCode::VersionMismatch,
            ReasonCode::StaleTimestamp,
            ReasonCode::ReplayDetected,
            ReasonCode::InvalidSignature,
            ReasonCode::Unauthenticated,
            ReasonCode::UnknownPlatform,
            ReasonCode::ForbiddenEndpoint,
            ReasonCode::RateLimited,
            ReasonCode::MalformedMessage,
            ReasonCode::InternalError,
        ];
        for code in codes {
            assert_eq!(ReasonCode::from_str(code.as_str()).unwrap(), code);
        }
        assert!(ReasonCode::from_str("nope").is_err());
    }

    #[test]
    fn reason_code_serializes_snake_case() {
        let json = serde_json::to_value(ReasonCode::StaleTimestamp).unwrap();
        assert_eq!(json, serde_json::json!("stale_timestamp"));
    }
}
