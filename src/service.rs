/*!
 * KME service operations
 *
 * The logical operations a transport layer maps onto its routes: status,
 * key generation for a master/slave pair, retrieval by consumer and by key
 * identifier, plus registration of KMEs and SAEs and KME connections.
 */

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::{KmeConfig, KmePolicy};
use crate::error::{error_codes, KmeError, KmeResult};
use crate::lifecycle::{
    admit_batch, validate_request, GeneratedBatch, GenerationRequest, KeyLifecycleManager,
};
use crate::model::{Kme, KeyContainer, KeyId, KmeConnection, KmeId, Sae, SaeId};
use crate::pairing::{relay_batch, PairingManager, RelayClient};
use crate::sifting::SiftedKey;
use crate::store::KmeStore;

/// Status of the key supply between a slave SAE and its master
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(rename = "source_KME_ID")]
    pub source_kme_id: KmeId,
    #[serde(rename = "target_KME_ID")]
    pub target_kme_id: KmeId,
    #[serde(rename = "master_SAE_ID")]
    pub master_sae_id: SaeId,
    #[serde(rename = "slave_SAE_ID")]
    pub slave_sae_id: SaeId,
    pub key_size: u32,
    pub stored_key_count: u64,
    pub max_key_count: u64,
    pub max_key_per_request: u32,
    pub max_key_size: u32,
    pub min_key_size: u32,
    #[serde(rename = "max_SAE_ID_count")]
    pub max_additional_target_count: u32,
}

/// GenerateKeys input; omitted `number`/`size` take the configured defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateKeysRequest {
    pub slave_sae_id: SaeId,
    pub master_sae_id: SaeId,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default, rename = "additional_slave_SAE_IDs")]
    pub additional_targets: Vec<SaeId>,
}

/// `{"keys": [{"key_ID", "key"}, ...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBatchResponse {
    pub keys: Vec<KeyContainer>,
}

/// A single key unwrapped for an authorized requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainKey {
    pub key_id: KeyId,
    pub bits: SiftedKey,
}

/// Key Management Entity front
pub struct KmeService {
    config: KmeConfig,
    store: Arc<dyn KmeStore>,
    lifecycle: KeyLifecycleManager,
    pairing: PairingManager,
    relay: Arc<dyn RelayClient>,
}

impl std::fmt::Debug for KmeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmeService")
            .field("config", &self.config)
            .field("pairing", &self.pairing)
            .finish_non_exhaustive()
    }
}

impl KmeService {
    /// Build a service over `store` and `relay`
    ///
    /// Without a configured master secret an ephemeral one is drawn from the
    /// OS; records sealed under it cannot be opened after a restart.
    pub fn new(
        config: KmeConfig,
        store: Arc<dyn KmeStore>,
        relay: Arc<dyn RelayClient>,
    ) -> KmeResult<Self> {
        config.validate()?;

        let master_secret = if config.master_secret_hex.is_empty() {
            log::warn!("No master secret configured, using an ephemeral one");
            let mut secret = Zeroizing::new(vec![0u8; 32]);
            OsRng.try_fill_bytes(&mut secret).map_err(|e| KmeError::RandomGenerationError {
                cause: e.to_string(),
                error_code: error_codes::RNG_FAILED,
            })?;
            secret
        } else {
            config.master_secret()?
        };

        let lifecycle = KeyLifecycleManager::new(store.clone(), &master_secret)?;
        let pairing = PairingManager::new(store.clone(), config.pairing_policy);

        Ok(Self {
            config,
            store,
            lifecycle,
            pairing,
            relay,
        })
    }

    pub fn config(&self) -> &KmeConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &KeyLifecycleManager {
        &self.lifecycle
    }

    pub fn pairing(&self) -> &PairingManager {
        &self.pairing
    }

    /// Register a KME; `policy` defaults to the configured one
    pub fn register_kme<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        name: &str,
        hostname: &str,
        policy: Option<KmePolicy>,
        certificate: Option<&[u8]>,
    ) -> KmeResult<Kme> {
        let policy = policy.unwrap_or(self.config.default_policy);
        policy.validate()?;

        let mut kme = Kme::new(KmeId::random(rng), name, hostname, policy);
        if let Some(certificate) = certificate {
            kme = kme.with_certificate(certificate);
        }
        self.store.insert_kme(kme.clone())?;
        log::info!("Registered KME {} ({})", kme.id, kme.hostname);
        Ok(kme)
    }

    /// Register an SAE under an existing KME
    pub fn register_sae<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        name: &str,
        kme_id: &KmeId,
        is_master: bool,
        certificate_der: Option<&[u8]>,
    ) -> KmeResult<Sae> {
        let mut sae = Sae::new(SaeId::random(rng), name, *kme_id, is_master);
        if let Some(der) = certificate_der {
            sae = sae.with_certificate(der);
        }
        self.store.insert_sae(sae.clone())?;
        log::info!("Registered SAE {} on KME {}", sae.id, kme_id);
        Ok(sae)
    }

    /// Create or refresh the connection between two KMEs
    pub fn connect_kmes(
        &self,
        source: &KmeId,
        target: &KmeId,
        certificate: &[u8],
    ) -> KmeResult<KmeConnection> {
        self.pairing.establish_kme_connection(source, target, certificate)
    }

    /// GetStatus: counters of the master's KME as seen by `slave`
    ///
    /// # Errors
    ///
    /// `NotFound` if the slave is unknown, `NoPairing` if it has no master.
    pub fn get_status(&self, slave: &SaeId) -> KmeResult<StatusResponse> {
        let route = self.pairing.resolve_route(slave)?;
        let target = self.store.kme(&route.target_kme)?;

        Ok(StatusResponse {
            source_kme_id: route.source_kme,
            target_kme_id: route.target_kme,
            master_sae_id: route.master_sae,
            slave_sae_id: *slave,
            key_size: target.key_size,
            stored_key_count: target.stored_key_count,
            max_key_count: target.policy.max_key_count,
            max_key_per_request: target.policy.max_key_per_request,
            max_key_size: target.policy.max_key_size,
            min_key_size: target.policy.min_key_size,
            max_additional_target_count: target.policy.max_additional_target_count,
        })
    }

    /// GenerateKeys
    ///
    /// Every policy check runs before anything is generated. The batch is
    /// generated and committed at the master's KME in one store transaction
    /// with the pairing and the new key size, so a failed request leaves the
    /// store as it was. When the slave lives on another KME the federation
    /// must validate first, and the committed batch is then relayed to the
    /// slave's KME.
    pub fn generate_keys<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        request: &GenerateKeysRequest,
    ) -> KmeResult<KeyBatchResponse> {
        let slave = self.store.sae(&request.slave_sae_id)?;
        let master = self.store.sae(&request.master_sae_id)?;
        let link = self.pairing.prepare_link(&master, &slave)?;
        let master_kme = self.store.kme(&master.kme_id)?;

        let mut target_saes = vec![slave.id];
        for id in &request.additional_targets {
            self.store.sae(id)?;
            if !target_saes.contains(id) {
                target_saes.push(*id);
            }
        }

        let count = request.number.unwrap_or(self.config.request_defaults.number);
        let size = request
            .size
            .or(self.config.request_defaults.size)
            .unwrap_or(master_kme.key_size);

        let generation = GenerationRequest {
            kme_id: master_kme.id,
            origin_sae: master.id,
            target_saes,
            count: count as usize,
            bits_per_key: size as usize,
            pairing: Some(link),
        };
        validate_request(&master_kme, &generation)?;
        admit_batch(&master_kme, generation.count as u64)?;

        let cross_kme = slave.kme_id != master.kme_id;
        if cross_kme {
            self.pairing.ensure_federation(&master.kme_id, &slave.kme_id)?;
        }

        let batch = self.lifecycle.generate_and_store(rng, &generation)?;
        self.pairing.report_link(&link, &batch.detached);

        if cross_kme {
            self.relay_to_peer(&master_kme, &slave, &batch);
        }

        Ok(KeyBatchResponse {
            keys: batch.containers(),
        })
    }

    /// Record the master -> slave connection and push the batch to the
    /// slave's KME; failures are logged, the batch stays committed
    fn relay_to_peer(&self, master_kme: &Kme, slave: &Sae, batch: &GeneratedBatch) {
        let connected = self
            .pairing
            .establish_kme_connection(
                &master_kme.id,
                &slave.kme_id,
                master_kme.certificate.as_deref().unwrap_or_default(),
            )
            .and_then(|_| self.store.kme(&slave.kme_id));

        match connected {
            Ok(peer) => {
                relay_batch(self.relay.as_ref(), &peer, &slave.id, batch);
            }
            Err(e) => log::warn!(
                "Batch for SAE {} committed but not relayed to KME {}: {}",
                slave.id,
                slave.kme_id,
                e
            ),
        }
    }

    /// FetchKeysForConsumer
    pub fn fetch_keys_for_consumer(&self, slave: &SaeId) -> KmeResult<KeyBatchResponse> {
        self.store.sae(slave)?;
        Ok(KeyBatchResponse {
            keys: self.lifecycle.fetch_for_consumer(slave)?,
        })
    }

    /// FetchKeyById
    pub fn fetch_key_by_id(&self, requester: &SaeId, key_id: &KeyId) -> KmeResult<PlainKey> {
        let bits = self.lifecycle.fetch_by_id(key_id, requester)?;
        Ok(PlainKey {
            key_id: *key_id,
            bits,
        })
    }

    /// Explicitly detach `sae` from its partner
    pub fn unpair(&self, sae: &SaeId) -> KmeResult<SaeId> {
        self.pairing.unpair(sae)
    }
}
