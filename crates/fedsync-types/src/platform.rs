//! Registration records for platforms calling the signed REST gateway.

use serde::{Deserialize, Serialize};

/// Per-platform rate-limit configuration: two independent fixed windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitProfile {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for RateLimitProfile {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1_000,
        }
    }
}

/// A platform registered for the stateless signed-request path.
///
/// Immutable for the lifetime of a registration; an update replaces the
/// whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredPlatform {
    pub platform_id: String,
    pub api_key: String,
    /// Shared secret keying per-request HMAC signatures.
    pub signing_secret: String,
    /// Allow-listed endpoint path patterns: exact, or prefix with a
    /// trailing `*` (e.g. `/api/sync/*`).
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub rate_limit: RateLimitProfile,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl RegisteredPlatform {
    /// Returns true if `path` matches at least one allow-listed pattern.
    pub fn allows_path(&self, path: &str) -> bool {
        self.allowed_paths.iter().any(|pattern| {
            if let Some(prefix) = pattern.strip_suffix('*') {
                path.starts_with(prefix)
            } else {
                path == pattern
            }
        })
    }
}
