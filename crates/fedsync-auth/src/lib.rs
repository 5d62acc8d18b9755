//! Credential verification and replay tracking for the fedsync platform.
//!
//! Three building blocks live here:
//!
//! - [`NonceLedger`]: tracks recently-seen random tokens so a replayed
//!   handshake offer is rejected.
//! - [`TokenIssuer`] / [`CredentialVerifier`]: HMAC-signed, time-bound
//!   bearer tokens and keyed-hash message signatures.
//! - [`constant_time_eq`]: the comparison primitive for everything
//!   secret-bearing.
//!
//! Nothing here is stateful beyond the nonce ledger; the verifier can be
//! shared freely between the connection hub and the REST gateway.

mod nonce;
mod signature;
mod token;

pub use nonce::NonceLedger;
pub use signature::{sign_payload, verify_signature};
pub use token::{Claims, CredentialError, CredentialVerifier, TokenIssuer};

/// Compares two byte slices in constant time.
///
/// The accumulator visits every byte regardless of where the first
/// difference occurs, so comparison time does not leak the position or
/// count of differing bytes.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
