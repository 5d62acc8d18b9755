//! Background tasks for the fedsync server.
//!
//! The liveness sweep lives in `fedsync-hub`; this module owns the
//! nonce-ledger eviction loop and the helper that spawns everything.

use crate::AppState;
use fedsync_auth::NonceLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Periodically evicts expired entries from the nonce ledger. Replay
/// protection does not depend on this; it only bounds memory.
pub async fn start_nonce_sweep(nonces: Arc<NonceLedger>, interval: Duration) {
    loop {
        sleep(interval).await;
        let evicted = nonces.sweep();
        if evicted > 0 {
            tracing::debug!(evicted, "swept expired handshake nonces");
        }
    }
}

/// Spawns every background task the server needs.
pub fn spawn_all(state: &AppState) {
    tokio::spawn(fedsync_hub::start_liveness_sweep(state.hub.clone()));
    tokio::spawn(start_nonce_sweep(
        state.nonces.clone(),
        state.hub.config.sweep_interval,
    ));
}
