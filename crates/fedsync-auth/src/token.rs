//! HMAC-signed, time-bound bearer tokens.
//!
//! Token format: `base64url(subject|issued_unix|expires_unix|hmac_hex)`.
//! The MAC covers the three claim parts; expiry is checked only after the
//! MAC verifies so an attacker cannot probe claim structure with forged
//! tokens.

use crate::constant_time_eq;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const B64: base64::engine::general_purpose::GeneralPurpose =
    base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Verified claims extracted from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Errors from token verification.
///
/// Structural anomalies (wrong part count, undecodable payload) and MAC
/// mismatch all collapse into [`CredentialError::InvalidToken`]; callers
/// must not be able to distinguish them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
}

/// Mints bearer tokens keyed by the issuer secret.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    key: Vec<u8>,
}

impl TokenIssuer {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Issues a token for `subject`, valid for `ttl` from now.
    pub fn issue(&self, subject: &str, ttl: Duration) -> String {
        let issued_at = chrono::Utc::now().timestamp();
        let expires_at = issued_at + ttl.as_secs() as i64;
        let claims = format!("{}|{}|{}", subject, issued_at, expires_at);
        let mac = mac_hex(&self.key, &claims);
        B64.encode(format!("{}|{}", claims, mac))
    }

    /// A verifier sharing this issuer's key.
    pub fn verifier(&self) -> CredentialVerifier {
        CredentialVerifier::new(self.key.clone())
    }
}

/// Validates bearer tokens and keyed message signatures. Stateless.
#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    key: Vec<u8>,
}

impl CredentialVerifier {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Verifies a bearer token: structure, MAC (constant time), then expiry.
    pub fn verify_token(&self, token: &str) -> Result<Claims, CredentialError> {
        let decoded = B64
            .decode(token.as_bytes())
            .map_err(|_| CredentialError::InvalidToken)?;
        let text = String::from_utf8(decoded).map_err(|_| CredentialError::InvalidToken)?;

        let parts: Vec<&str> = text.split('|').collect();
        let [subject, issued_str, expires_str, mac_str] = parts.as_slice() else {
            return Err(CredentialError::InvalidToken);
        };

        let claims = format!("{}|{}|{}", subject, issued_str, expires_str);
        let expected = mac_hex(&self.key, &claims);
        if !constant_time_eq(expected.as_bytes(), mac_str.as_bytes()) {
            return Err(CredentialError::InvalidToken);
        }

        let issued_at: i64 = issued_str.parse().map_err(|_| CredentialError::InvalidToken)?;
        let expires_at: i64 = expires_str
            .parse()
            .map_err(|_| CredentialError::InvalidToken)?;

        if chrono::Utc::now().timestamp() >= expires_at {
            return Err(CredentialError::Expired);
        }

        Ok(Claims {
            subject: subject.to_string(),
            issued_at,
            expires_at,
        })
    }
}

fn mac_hex(key: &[u8], claims: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(claims.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let issuer = TokenIssuer::new(b"issuer-key".to_vec());
        let token = issuer.issue("node-a", Duration::from_secs(3600));
        let claims = issuer.verifier().verify_token(&token).unwrap();
        assert_eq!(claims.subject, "node-a");
        assert_eq!(claims.expires_at - claims.issued_at, 3600);
    }

    #[test]
    fn expired_token_rejected_regardless_of_mac() {
        let issuer = TokenIssuer::new(b"issuer-key".to_vec());
        let token = issuer.issue("node-a", Duration::from_secs(0));
        assert_eq!(
            issuer.verifier().verify_token(&token),
            Err(CredentialError::Expired)
        );
    }

    #[test]
    fn tampered_subject_fails_as_invalid() {
        let issuer = TokenIssuer::new(b"issuer-key".to_vec());
        let token = issuer.issue("node-a", Duration::from_secs(3600));

        let decoded = B64.decode(token.as_bytes()).unwrap();
        let tampered = String::from_utf8(decoded)
            .unwrap()
            .replacen("node-a", "node-b", 1);
        let forged = B64.encode(tampered);

        assert_eq!(
            issuer.verifier().verify_token(&forged),
            Err(CredentialError::InvalidToken)
        );
    }

    #[test]
    fn wrong_key_fails_as_invalid() {
        let issuer = TokenIssuer::new(b"issuer-key".to_vec());
        let token = issuer.issue("node-a", Duration::from_secs(3600));
        let verifier = CredentialVerifier::new(b"other-key".to_vec());
        assert_eq!(verifier.verify_token(&token), Err(CredentialError::InvalidToken));
    }

    #[test]
    fn structural_garbage_fails_identically_to_bad_mac() {
        let verifier = CredentialVerifier::new(b"issuer-key".to_vec());
        for garbage in ["", "not base64 at all!!", &B64.encode("only|three|parts")] {
            assert_eq!(
                verifier.verify_token(garbage),
                Err(CredentialError::InvalidToken),
                "token {:?} should be opaquely invalid",
                garbage
            );
        }
    }
}
