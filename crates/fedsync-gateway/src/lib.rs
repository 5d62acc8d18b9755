//! Stateless signed-request gateway for platform REST calls.
//!
//! Every request is independently authenticated from four headers plus the
//! raw body; nothing session-scoped is consulted. [`RequestGateway::admit`]
//! is pure with respect to HTTP: the server crate adapts it into an axum
//! middleware and maps [`GatewayRejection`] onto status codes.

mod rate_limit;

pub use rate_limit::{RateDecision, RateLimitTracker};

use fedsync_auth::{constant_time_eq, verify_signature};
use fedsync_types::{ReasonCode, RegisteredPlatform};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

pub const HEADER_PLATFORM_ID: &str = "x-platform-id";
pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_SIGNATURE: &str = "x-signature";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";

/// The credential material extracted from one request.
///
/// Header values are `None` when absent; the gateway, not the transport
/// layer, decides what absence means.
#[derive(Debug, Clone, Copy)]
pub struct AdmitRequest<'a> {
    pub path: &'a str,
    /// Raw body bytes exactly as received; never a re-serialization.
    pub body: &'a [u8],
    pub platform_id: Option<&'a str>,
    pub api_key: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
}

/// Proof of admission, attached to the request for downstream handlers.
#[derive(Debug, Clone)]
pub struct Admission {
    pub platform_id: String,
    pub minute_remaining: u32,
    pub hour_remaining: u32,
}

/// Why a request was refused. Ordered to match the check sequence; the
/// first failing check wins and later ones never run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayRejection {
    #[error("missing required headers: {}", missing.join(", "))]
    MissingHeaders { missing: Vec<&'static str> },
    #[error("unknown or inactive platform")]
    UnknownPlatform,
    #[error("api key mismatch")]
    BadApiKey,
    #[error("timestamp outside freshness window ({skew_secs}s skew)")]
    StaleTimestamp { skew_secs: i64 },
    #[error("request signature verification failed")]
    InvalidSignature,
    #[error("platform not allowed to call {path}")]
    ForbiddenEndpoint { path: String },
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
}

impl GatewayRejection {
    /// The stable code carried in the rejection body.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::MissingHeaders { .. } => ReasonCode::Unauthenticated,
            Self::UnknownPlatform => ReasonCode::UnknownPlatform,
            Self::BadApiKey => ReasonCode::Unauthenticated,
            Self::StaleTimestamp { .. } => ReasonCode::StaleTimestamp,
            Self::InvalidSignature => ReasonCode::InvalidSignature,
            Self::ForbiddenEndpoint { .. } => ReasonCode::ForbiddenEndpoint,
            Self::RateLimited { .. } => ReasonCode::RateLimited,
        }
    }

    /// HTTP status for this rejection. Credential failures are uniformly
    /// 401; only authorization and quota get distinct statuses.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ForbiddenEndpoint { .. } => 403,
            Self::RateLimited { .. } => 429,
            _ => 401,
        }
    }
}

/// Registered platforms, keyed by platform id. Replace-on-update: a
/// re-registration overwrites the whole record.
#[derive(Debug, Default)]
pub struct PlatformDirectory {
    platforms: RwLock<HashMap<String, RegisteredPlatform>>,
}

impl PlatformDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, platform: RegisteredPlatform) {
        self.write().insert(platform.platform_id.clone(), platform);
    }

    pub fn remove(&self, platform_id: &str) {
        self.write().remove(platform_id);
    }

    pub fn get(&self, platform_id: &str) -> Option<RegisteredPlatform> {
        match self.platforms.read() {
            Ok(platforms) => platforms.get(platform_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(platform_id).cloned(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RegisteredPlatform>> {
        match self.platforms.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Runs the ordered admission checks for the signed REST path.
pub struct RequestGateway {
    directory: Arc<PlatformDirectory>,
    limiter: RateLimitTracker,
    freshness_window: Duration,
}

impl RequestGateway {
    pub fn new(
        directory: Arc<PlatformDirectory>,
        limiter: RateLimitTracker,
        freshness_window: Duration,
    ) -> Self {
        Self {
            directory,
            limiter,
            freshness_window,
        }
    }

    pub fn directory(&self) -> Arc<PlatformDirectory> {
        self.directory.clone()
    }

    /// Admits or refuses one request.
    ///
    /// Check order: headers present → known active platform → API key →
    /// timestamp freshness → body signature → path allow-list → rate
    /// limit. First failure short-circuits; the rate counter moves only
    /// when every prior check passed, so denials never consume quota.
    pub fn admit(&self, request: &AdmitRequest<'_>) -> Result<Admission, GatewayRejection> {
        let mut missing = Vec::new();
        if request.platform_id.is_none() {
            missing.push("X-Platform-Id");
        }
        if request.api_key.is_none() {
            missing.push("X-Api-Key");
        }
        if request.signature.is_none() {
            missing.push("X-Signature");
        }
        if request.timestamp.is_none() {
            missing.push("X-Timestamp");
        }
        if !missing.is_empty() {
            return Err(GatewayRejection::MissingHeaders { missing });
        }
        // All four verified present above.
        let (platform_id, api_key, signature, timestamp) = (
            request.platform_id.unwrap_or_default(),
            request.api_key.unwrap_or_default(),
            request.signature.unwrap_or_default(),
            request.timestamp.unwrap_or_default(),
        );

        let platform = self
            .directory
            .get(platform_id)
            .filter(|p| p.active)
            .ok_or(GatewayRejection::UnknownPlatform)?;

        if !constant_time_eq(platform.api_key.as_bytes(), api_key.as_bytes()) {
            return Err(GatewayRejection::BadApiKey);
        }

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| GatewayRejection::StaleTimestamp { skew_secs: i64::MAX })?;
        let skew_secs = (chrono::Utc::now().timestamp() - ts).abs();
        if skew_secs > self.freshness_window.as_secs() as i64 {
            return Err(GatewayRejection::StaleTimestamp { skew_secs });
        }

        if !verify_signature(
            platform.signing_secret.as_bytes(),
            request.body,
            timestamp,
            signature,
        ) {
            return Err(GatewayRejection::InvalidSignature);
        }

        if !platform.allows_path(request.path) {
            return Err(GatewayRejection::ForbiddenEndpoint {
                path: request.path.to_string(),
            });
        }

        match self.limiter.check(platform_id, &platform.rate_limit) {
            RateDecision::Admitted {
                minute_remaining,
                hour_remaining,
            } => Ok(Admission {
                platform_id: platform.platform_id,
                minute_remaining,
                hour_remaining,
            }),
            RateDecision::Denied { retry_after_secs } => {
                Err(GatewayRejection::RateLimited { retry_after_secs })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedsync_auth::sign_payload;
    use fedsync_types::RateLimitProfile;

    fn platform(per_minute: u32) -> RegisteredPlatform {
        RegisteredPlatform {
            platform_id: "p1".to_string(),
            api_key: "key-1".to_string(),
            signing_secret: "secret-1".to_string(),
            allowed_paths: vec!["/api/sync".to_string(), "/api/nodes/*".to_string()],
            rate_limit: RateLimitProfile {
                requests_per_minute: per_minute,
                requests_per_hour: 1_000,
            },
            active: true,
        }
    }

    fn gateway(per_minute: u32) -> RequestGateway {
        let directory = Arc::new(PlatformDirectory::new());
        directory.register(platform(per_minute));
        RequestGateway::new(
            directory,
            RateLimitTracker::new(),
            Duration::from_secs(300),
        )
    }

    fn signed<'a>(
        path: &'a str,
        body: &'a [u8],
        timestamp: &'a str,
        signature: &'a str,
    ) -> AdmitRequest<'a> {
        AdmitRequest {
            path,
            body,
            platform_id: Some("p1"),
            api_key: Some("key-1"),
            signature: Some(signature),
            timestamp: Some(timestamp),
        }
    }

    fn now_ts() -> String {
        chrono::Utc::now().timestamp().to_string()
    }

    #[test]
    fn valid_request_is_admitted() {
        let gw = gateway(60);
        let body = br#"{"syncType":"knowledge"}"#;
        let ts = now_ts();
        let sig = sign_payload(b"secret-1", body, &ts);

        let admission = gw.admit(&signed("/api/sync", body, &ts, &sig)).unwrap();
        assert_eq!(admission.platform_id, "p1");
        assert_eq!(admission.minute_remaining, 59);
    }

    #[test]
    fn missing_headers_are_enumerated() {
        let gw = gateway(60);
        let request = AdmitRequest {
            path: "/api/sync",
            body: b"",
            platform_id: Some("p1"),
            api_key: None,
            signature: None,
            timestamp: Some("0"),
        };
        match gw.admit(&request).unwrap_err() {
            GatewayRejection::MissingHeaders { missing } => {
                assert_eq!(missing, vec!["X-Api-Key", "X-Signature"]);
            }
            other => panic!("expected missing headers, got {:?}", other),
        }
    }

    #[test]
    fn unknown_platform_rejected() {
        let gw = gateway(60);
        let ts = now_ts();
        let sig = sign_payload(b"secret-1", b"", &ts);
        let mut request = signed("/api/sync", b"", &ts, &sig);
        request.platform_id = Some("nobody");
        assert_eq!(
            gw.admit(&request).unwrap_err(),
            GatewayRejection::UnknownPlatform
        );
    }

    #[test]
    fn inactive_platform_looks_unknown() {
        let directory = Arc::new(PlatformDirectory::new());
        let mut p = platform(60);
        p.active = false;
        directory.register(p);
        let gw = RequestGateway::new(
            directory,
            RateLimitTracker::new(),
            Duration::from_secs(300),
        );

        let ts = now_ts();
        let sig = sign_payload(b"secret-1", b"", &ts);
        assert_eq!(
            gw.admit(&signed("/api/sync", b"", &ts, &sig)).unwrap_err(),
            GatewayRejection::UnknownPlatform
        );
    }

    #[test]
    fn wrong_api_key_rejected_before_signature() {
        let gw = gateway(60);
        let ts = now_ts();
        let sig = sign_payload(b"secret-1", b"", &ts);
        let mut request = signed("/api/sync", b"", &ts, &sig);
        request.api_key = Some("key-2");
        assert_eq!(gw.admit(&request).unwrap_err(), GatewayRejection::BadApiKey);
    }

    #[test]
    fn stale_timestamp_rejected_even_with_valid_signature() {
        let gw = gateway(60);
        let ts = (chrono::Utc::now().timestamp() - 400).to_string();
        let sig = sign_payload(b"secret-1", b"body", &ts);
        match gw.admit(&signed("/api/sync", b"body", &ts, &sig)).unwrap_err() {
            GatewayRejection::StaleTimestamp { skew_secs } => assert!(skew_secs >= 400),
            other => panic!("expected stale timestamp, got {:?}", other),
        }
    }

    #[test]
    fn future_timestamp_also_stale() {
        let gw = gateway(60);
        let ts = (chrono::Utc::now().timestamp() + 400).to_string();
        let sig = sign_payload(b"secret-1", b"", &ts);
        assert!(matches!(
            gw.admit(&signed("/api/sync", b"", &ts, &sig)).unwrap_err(),
            GatewayRejection::StaleTimestamp { .. }
        ));
    }

    #[test]
    fn tampered_body_fails_signature() {
        let gw = gateway(60);
        let ts = now_ts();
        let sig = sign_payload(b"secret-1", b"original", &ts);
        assert_eq!(
            gw.admit(&signed("/api/sync", b"tampered", &ts, &sig))
                .unwrap_err(),
            GatewayRejection::InvalidSignature
        );
    }

    #[test]
    fn path_outside_allow_list_is_forbidden() {
        let gw = gateway(60);
        let ts = now_ts();
        let sig = sign_payload(b"secret-1", b"", &ts);
        match gw.admit(&signed("/api/admin", b"", &ts, &sig)).unwrap_err() {
            GatewayRejection::ForbiddenEndpoint { path } => assert_eq!(path, "/api/admin"),
            other => panic!("expected forbidden endpoint, got {:?}", other),
        }
    }

    #[test]
    fn wildcard_path_is_allowed() {
        let gw = gateway(60);
        let ts = now_ts();
        let sig = sign_payload(b"secret-1", b"", &ts);
        assert!(gw.admit(&signed("/api/nodes/n1", b"", &ts, &sig)).is_ok());
    }

    #[test]
    fn sixth_request_of_five_is_rate_limited() {
        let gw = gateway(5);
        let ts = now_ts();
        let sig = sign_payload(b"secret-1", b"", &ts);
        for _ in 0..5 {
            gw.admit(&signed("/api/sync", b"", &ts, &sig)).unwrap();
        }
        assert!(matches!(
            gw.admit(&signed("/api/sync", b"", &ts, &sig)).unwrap_err(),
            GatewayRejection::RateLimited { .. }
        ));
    }

    #[test]
    fn denied_requests_do_not_consume_quota() {
        let gw = gateway(2);
        let ts = now_ts();
        let sig = sign_payload(b"secret-1", b"", &ts);

        // Repeated forbidden-path denials never reach the counter.
        for _ in 0..10 {
            assert!(matches!(
                gw.admit(&signed("/api/admin", b"", &ts, &sig)).unwrap_err(),
                GatewayRejection::ForbiddenEndpoint { .. }
            ));
        }
        assert!(gw.admit(&signed("/api/sync", b"", &ts, &sig)).is_ok());
        assert!(gw.admit(&signed("/api/sync", b"", &ts, &sig)).is_ok());
    }

    #[test]
    fn rejection_maps_to_codes_and_statuses() {
        assert_eq!(
            GatewayRejection::UnknownPlatform.reason_code(),
            ReasonCode::UnknownPlatform
        );
        assert_eq!(GatewayRejection::BadApiKey.http_status(), 401);
        assert_eq!(
            GatewayRejection::ForbiddenEndpoint {
                path: "/x".to_string()
            }
            .http_status(),
            403
        );
        assert_eq!(
            GatewayRejection::RateLimited {
                retry_after_secs: 60
            }
            .http_status(),
            429
        );
    }
}
