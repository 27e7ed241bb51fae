/*!
 * QKD Key Management Entity
 *
 * This crate implements an ETSI-QKD-style Key Management Entity (KME): it
 * simulates BB84 key agreement, stores the resulting keys wrapped for
 * at-rest protection, and serves them to paired Secure Application
 * Entities (SAEs) under per-KME capacity and size policy, optionally
 * relaying batches to a second KME.
 *
 * The main building blocks are:
 *
 * - BB84 basis sifting over a simulated noiseless channel
 * - AES-128-GCM key wrapping with a versioned bit encoding
 * - A transactional store with atomic batch commit and capacity accounting
 * - Master/slave pairing and KME-to-KME federation
 *
 * Randomness is always injected by the caller, so every operation can be
 * seeded deterministically in tests.
 */

/// Common error types for the KME
pub mod error;

/// Records: KMEs, SAEs, keys, key material and connections
pub mod model;

/// Policy defaults and runtime configuration
pub mod config;

/// BB84 sifting engine
pub mod sifting;

/// Key wrapping and wrapping-key vault
pub mod wrapper;

/// Durable store port and in-memory adapter
pub mod store;

/// Key generation, storage and retrieval
pub mod lifecycle;

/// SAE pairing and KME federation
pub mod pairing;

/// Logical KME operations
pub mod service;

// Re-export main types for convenience
pub use config::{KmeConfig, KmePolicy, PairingPolicy};
pub use error::{KmeError, KmeResult};
pub use lifecycle::{GeneratedBatch, GenerationRequest, KeyLifecycleManager};
pub use model::{Key, KeyId, KeyMaterial, Kme, KmeConnection, KmeId, Sae, SaeId};
pub use pairing::{NoopRelay, PairingManager, RecordingRelay, RelayClient, RelayRequest};
pub use service::{GenerateKeysRequest, KeyBatchResponse, KmeService, StatusResponse};
pub use sifting::SiftedKey;
pub use store::{KmeStore, MemoryStore};
pub use wrapper::{KeyWrapper, WrappingKey};

/// Initialize the KME library.
///
/// No global state is set up today; the function keeps a stable entry point
/// for callers that want one.
///
/// # Example
///
/// ```
/// use qkd_kme::prelude::*;
///
/// fn main() -> Result<(), KmeError> {
///     init()?;
///     Ok(())
/// }
/// ```
pub fn init() -> Result<(), KmeError> {
    Ok(())
}

/// The types most callers need to run a KME
pub mod prelude {
    pub use crate::config::{KmeConfig, KmePolicy, PairingPolicy, RequestDefaults};
    pub use crate::error::{KmeError, KmeResult};
    pub use crate::init;
    pub use crate::model::{KeyContainer, KeyId, Kme, KmeId, Sae, SaeId};
    pub use crate::pairing::{NoopRelay, RecordingRelay, RelayClient};
    pub use crate::service::{GenerateKeysRequest, KeyBatchResponse, KmeService, StatusResponse};
    pub use crate::sifting::{sift, SiftedKey};
    pub use crate::store::{KmeStore, MemoryStore};
}
