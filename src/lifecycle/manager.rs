use std::sync::Arc;

use chrono::Utc;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::config::MIN_MASTER_SECRET_LEN;
use crate::error::{error_codes, KmeError, KmeResult};
use crate::model::{Key, KeyContainer, KeyId, KeyMaterial, KeyRecord, Kme, KmeId, SaeId};
use crate::sifting::{self, SiftedKey};
use crate::store::{BatchCommit, KmeStore, SaeLink};
use crate::wrapper::{KeyVault, KeyWrapper, WrappingKey, ENCODING_V1};

/// Parameters of one generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// KME that owns the batch and whose capacity is charged
    pub kme_id: KmeId,
    /// Producer of the keys
    pub origin_sae: SaeId,
    /// Consumers: the mandatory slave first, then additional targets
    pub target_saes: Vec<SaeId>,
    pub count: usize,
    pub bits_per_key: usize,
    /// Pairing committed together with the batch
    pub pairing: Option<SaeLink>,
}

/// Result of a committed generation request
#[derive(Debug)]
pub struct GeneratedBatch {
    pub kme_id: KmeId,
    pub materials: Vec<KeyMaterial>,
    /// Wrapping key of the batch, needed by the federation relay
    pub wrapping_key: WrappingKey,
    /// Stored key count of the KME after the commit
    pub stored_key_count: u64,
    /// Partners detached by the committed pairing
    pub detached: Vec<SaeId>,
}

impl GeneratedBatch {
    /// `{key_ID, key}` pairs in generation order
    pub fn containers(&self) -> Vec<KeyContainer> {
        self.materials.iter().map(KeyContainer::from).collect()
    }
}

/// Capacity check applied inside the batch commit
///
/// Rejects the batch if `stored_key_count + batch` would exceed
/// `max_key_count`.
pub fn admit_batch(kme: &Kme, batch: u64) -> KmeResult<()> {
    if batch > kme.remaining_capacity() {
        return Err(KmeError::capacity_exceeded(
            "max_key_count",
            kme.policy.max_key_count,
            kme.stored_key_count.saturating_add(batch),
            error_codes::STORED_KEY_LIMIT,
        ));
    }
    Ok(())
}

/// Check a request against the KME policy without generating anything
pub fn validate_request(kme: &Kme, request: &GenerationRequest) -> KmeResult<()> {
    let policy = &kme.policy;

    if request.target_saes.is_empty() {
        return Err(KmeError::invalid_parameter_with_code(
            "target_saes",
            "at least one consumer SAE",
            "0",
            error_codes::EMPTY_TARGET_SET,
        ));
    }
    if request.count == 0 {
        return Err(KmeError::invalid_parameter("number", "a positive integer", "0"));
    }

    sifting::validate_bits_per_key(request.bits_per_key)?;
    let bits = request.bits_per_key as u64;
    if bits < u64::from(policy.min_key_size) || bits > u64::from(policy.max_key_size) {
        return Err(KmeError::invalid_parameter_with_code(
            "size",
            &format!("{}..={} bits", policy.min_key_size, policy.max_key_size),
            &request.bits_per_key.to_string(),
            error_codes::KEY_SIZE_OUT_OF_RANGE,
        ));
    }

    if request.count as u64 > u64::from(policy.max_key_per_request) {
        return Err(KmeError::capacity_exceeded(
            "max_key_per_request",
            u64::from(policy.max_key_per_request),
            request.count as u64,
            error_codes::KEYS_PER_REQUEST_LIMIT,
        ));
    }

    let additional = request.target_saes.len() as u64 - 1;
    if additional > u64::from(policy.max_additional_target_count) {
        return Err(KmeError::capacity_exceeded(
            "max_SAE_ID_count",
            u64::from(policy.max_additional_target_count),
            additional,
            error_codes::ADDITIONAL_TARGET_LIMIT,
        ));
    }

    Ok(())
}

/// Drop repeated SAEs, keeping the first occurrence
fn dedup_targets(targets: &[SaeId]) -> Vec<SaeId> {
    let mut unique = Vec::with_capacity(targets.len());
    for target in targets {
        if !unique.contains(target) {
            unique.push(*target);
        }
    }
    unique
}

/// Generates, stores and serves key material for one or more KMEs
pub struct KeyLifecycleManager {
    store: Arc<dyn KmeStore>,
    master_secret: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for KeyLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLifecycleManager")
            .field("master_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl KeyLifecycleManager {
    pub fn new(store: Arc<dyn KmeStore>, master_secret: &[u8]) -> KmeResult<Self> {
        if master_secret.len() < MIN_MASTER_SECRET_LEN {
            return Err(KmeError::config_error(
                "master_secret",
                &format!("must be at least {} bytes", MIN_MASTER_SECRET_LEN),
            ));
        }
        Ok(Self {
            store,
            master_secret: Zeroizing::new(master_secret.to_vec()),
        })
    }

    /// Vault that seals the wrapping keys of `kme_id`
    pub fn vault_for(&self, kme_id: &KmeId) -> KmeResult<KeyVault> {
        KeyVault::derive(&self.master_secret, kme_id)
    }

    /// Sift, wrap and commit `request.count` keys
    ///
    /// All policy checks run before sifting. One wrapping key is drawn for
    /// the batch; each key is wrapped with its identifier as associated data.
    /// The batch is committed in one store transaction together with the
    /// capacity check, the requested pairing and the KME's new key size. A
    /// rejected request changes nothing in the store.
    pub fn generate_and_store<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        request: &GenerationRequest,
    ) -> KmeResult<GeneratedBatch> {
        let request = GenerationRequest {
            target_saes: dedup_targets(&request.target_saes),
            ..request.clone()
        };
        let kme = self.store.kme(&request.kme_id)?;
        validate_request(&kme, &request)?;
        admit_batch(&kme, request.count as u64)?;

        let sifted = sifting::sift(rng, request.count, request.bits_per_key)?;

        let wrapping_key = WrappingKey::generate(rng)?;
        let wrapper = KeyWrapper::new(&wrapping_key);
        let sealed = self.vault_for(&kme.id)?.seal(rng, &wrapping_key)?;

        let created_at = Utc::now();
        let records = sifted
            .iter()
            .map(|bits| -> KmeResult<KeyRecord> {
                let key_id = KeyId::random(rng);
                let wrapped = wrapper.wrap(rng, bits, key_id.as_uuid().as_bytes())?;
                Ok(KeyRecord {
                    key: Key {
                        key_id,
                        origin_sae: request.origin_sae,
                        target_saes: request.target_saes.clone(),
                        size: bits.len(),
                        created_at,
                    },
                    material: KeyMaterial {
                        key_id,
                        ciphertext: wrapped.ciphertext,
                        iv: wrapped.iv,
                        encoding_version: ENCODING_V1,
                        sealed_by: kme.id,
                        wrapping_key: sealed.clone(),
                        consumers: request.target_saes.clone(),
                        created_at,
                    },
                })
            })
            .collect::<KmeResult<Vec<_>>>()?;

        let materials: Vec<KeyMaterial> = records.iter().map(|r| r.material.clone()).collect();
        let commit = BatchCommit::new(kme.id, records, &admit_batch)
            .with_link(request.pairing)
            .with_key_size(request.bits_per_key as u32);
        let outcome = self
            .store
            .commit_key_batch(commit)
            .map_err(|e| {
                if let KmeError::CapacityExceeded { .. } = e {
                    log::warn!("Rejected batch of {} keys for KME {}: {}", request.count, kme.id, e);
                }
                e
            })?;

        log::info!(
            "Committed {} keys for SAE {} on KME {} ({} stored)",
            materials.len(),
            request.origin_sae,
            kme.id,
            outcome.stored_key_count
        );

        Ok(GeneratedBatch {
            kme_id: kme.id,
            materials,
            wrapping_key,
            stored_key_count: outcome.stored_key_count,
            detached: outcome.detached,
        })
    }

    /// All keys whose consumer set contains `sae`
    ///
    /// # Errors
    ///
    /// `NotFound` if there are none.
    pub fn fetch_for_consumer(&self, sae: &SaeId) -> KmeResult<Vec<KeyContainer>> {
        let materials = self.store.materials_for_consumer(sae)?;
        if materials.is_empty() {
            return Err(KmeError::not_found(
                "Key material for SAE",
                &sae.to_string(),
                error_codes::NO_KEYS_FOR_CONSUMER,
            ));
        }
        Ok(materials.iter().map(KeyContainer::from).collect())
    }

    /// Unwrap one key for its origin or one of its consumers
    ///
    /// # Errors
    ///
    /// * `NotFound` if no key has this identifier
    /// * `Unauthorized` if `requester` is neither origin nor consumer
    /// * `DecryptionError` / `IntegrityError` if the record cannot be opened
    pub fn fetch_by_id(&self, key_id: &KeyId, requester: &SaeId) -> KmeResult<SiftedKey> {
        let record = self.store.key_record(key_id)?;
        if !record.key.is_authorized(requester) {
            return Err(KmeError::unauthorized("fetch_by_id", &requester.to_string()));
        }

        let material = &record.material;
        if material.encoding_version != ENCODING_V1 {
            return Err(KmeError::integrity_error(
                "fetch_by_id",
                &format!("unsupported encoding version {}", material.encoding_version),
                error_codes::BIT_ENCODING_INVALID,
            ));
        }

        let wrapping_key = self.vault_for(&material.sealed_by)?.open(&material.wrapping_key)?;
        KeyWrapper::new(&wrapping_key).unwrap(
            &material.iv,
            &material.ciphertext,
            key_id.as_uuid().as_bytes(),
        )
    }
}
