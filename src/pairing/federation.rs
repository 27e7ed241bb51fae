use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::KmeResult;
use crate::lifecycle::GeneratedBatch;
use crate::model::{KeyId, Kme, SaeId};

/// One key of a relayed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedKey {
    pub key_id: KeyId,
    pub ciphertext: String,
    pub iv: String,
}

/// Payload pushed to a peer KME's key-ingestion endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub slave_sae_id: SaeId,
    pub keys: Vec<RelayedKey>,
    /// Base64 wrapping key of the batch
    pub wrapping_key: String,
}

impl RelayRequest {
    pub fn from_batch(slave: &SaeId, batch: &GeneratedBatch) -> Self {
        Self {
            slave_sae_id: *slave,
            keys: batch
                .materials
                .iter()
                .map(|m| RelayedKey {
                    key_id: m.key_id,
                    ciphertext: m.ciphertext.clone(),
                    iv: m.iv.clone(),
                })
                .collect(),
            wrapping_key: batch.wrapping_key.to_base64().to_string(),
        }
    }
}

impl std::fmt::Debug for RelayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayRequest")
            .field("slave_sae_id", &self.slave_sae_id)
            .field("keys", &self.keys.len())
            .field("wrapping_key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for RelayRequest {
    fn drop(&mut self) {
        self.wrapping_key.zeroize();
    }
}

/// Outbound client to a peer KME
///
/// Implementations own their timeout and retry policy.
pub trait RelayClient: Send + Sync {
    fn push_batch(&self, peer: &Kme, request: &RelayRequest) -> KmeResult<()>;
}

/// Relay that drops every batch after logging it
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRelay;

impl RelayClient for NoopRelay {
    fn push_batch(&self, peer: &Kme, request: &RelayRequest) -> KmeResult<()> {
        log::debug!(
            "Relay disabled, dropping {} keys for {} ({})",
            request.keys.len(),
            peer.id,
            peer.hostname
        );
        Ok(())
    }
}

/// Relay that keeps every request in memory
#[derive(Debug, Default)]
pub struct RecordingRelay {
    sent: Mutex<Vec<(Kme, RelayRequest)>>,
}

impl RecordingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<(Kme, RelayRequest)> {
        self.sent.lock().clone()
    }
}

impl RelayClient for RecordingRelay {
    fn push_batch(&self, peer: &Kme, request: &RelayRequest) -> KmeResult<()> {
        self.sent.lock().push((peer.clone(), request.clone()));
        Ok(())
    }
}

/// Hand a committed batch to `relay`
///
/// Fire-and-forget: a failure is logged and reported as `false`, the
/// committed batch stays in place.
pub fn relay_batch(relay: &dyn RelayClient, peer: &Kme, slave: &SaeId, batch: &GeneratedBatch) -> bool {
    let request = RelayRequest::from_batch(slave, batch);
    match relay.push_batch(peer, &request) {
        Ok(()) => {
            log::info!(
                "Relayed {} keys for SAE {} to KME {} ({})",
                request.keys.len(),
                slave,
                peer.id,
                peer.hostname
            );
            true
        }
        Err(e) => {
            log::warn!("Relay to KME {} failed, batch kept locally: {}", peer.id, e);
            false
        }
    }
}
