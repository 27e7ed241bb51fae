use std::sync::Arc;

use chrono::Utc;
use subtle::ConstantTimeEq;

use crate::config::PairingPolicy;
use crate::error::{error_codes, KmeError, KmeResult};
use crate::model::{KmeConnection, KmeId, Sae, SaeId};
use crate::store::{KmeStore, SaeLink};

/// Where a slave's keys come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// KME of the slave SAE
    pub source_kme: KmeId,
    /// KME of the paired master SAE
    pub target_kme: KmeId,
    pub master_sae: SaeId,
}

impl Route {
    pub fn is_cross_kme(&self) -> bool {
        self.source_kme != self.target_kme
    }
}

/// Only master SAEs may produce keys and open a pairing
pub fn ensure_master(sae: &Sae) -> KmeResult<()> {
    if sae.is_master {
        return Ok(());
    }
    Err(KmeError::invalid_parameter_with_code(
        "master_sae_id",
        "an SAE with is_master set",
        &sae.id.to_string(),
        error_codes::NOT_A_MASTER,
    ))
}

/// Maintains SAE pairings and KME connections
pub struct PairingManager {
    store: Arc<dyn KmeStore>,
    policy: PairingPolicy,
}

impl std::fmt::Debug for PairingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PairingManager {
    pub fn new(store: Arc<dyn KmeStore>, policy: PairingPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> PairingPolicy {
        self.policy
    }

    /// Link `master` and `slave` on both sides
    ///
    /// Under [`PairingPolicy::Overwrite`] previous partners are detached
    /// (with a warning); under [`PairingPolicy::RequireUnpaired`] an existing
    /// different partner fails with `AlreadyPaired`.
    ///
    /// # Errors
    ///
    /// * `NotFound` if either SAE is unknown
    /// * `InvalidParameter` if `master` is not a master SAE or both ids are equal
    pub fn pair(&self, master: &SaeId, slave: &SaeId) -> KmeResult<()> {
        let link = self.prepare_link(&self.store.sae(master)?, &self.store.sae(slave)?)?;
        let detached = self.store.link_saes(&link.master, &link.slave, link.replace)?;
        self.report_link(&link, &detached);
        Ok(())
    }

    /// Check that `master` may pair with `slave` under the current policy
    ///
    /// Nothing is written. The returned link is applied by
    /// [`KmeStore::link_saes`] or together with a key batch; the store repeats
    /// the partner check under its lock.
    pub fn prepare_link(&self, master: &Sae, slave: &Sae) -> KmeResult<SaeLink> {
        if master.id == slave.id {
            return Err(KmeError::invalid_parameter(
                "slave_sae_id",
                "an SAE other than the master",
                &slave.id.to_string(),
            ));
        }
        ensure_master(master)?;

        let replace = self.policy == PairingPolicy::Overwrite;
        if !replace {
            for (sae, new_partner) in [(master, slave.id), (slave, master.id)] {
                if let Some(partner) = sae.paired_with.filter(|p| *p != new_partner) {
                    return Err(KmeError::already_paired(
                        &sae.id.to_string(),
                        &partner.to_string(),
                    ));
                }
            }
        }

        Ok(SaeLink {
            master: master.id,
            slave: slave.id,
            replace,
        })
    }

    /// Log a link that has been committed
    pub fn report_link(&self, link: &SaeLink, detached: &[SaeId]) {
        for old in detached {
            log::warn!(
                "Pairing {} <-> {} detached previous partner {}",
                link.master,
                link.slave,
                old
            );
        }
        log::info!("Paired master SAE {} with slave SAE {}", link.master, link.slave);
    }

    /// Remove the pairing of `sae` on both sides, returning the former partner
    pub fn unpair(&self, sae: &SaeId) -> KmeResult<SaeId> {
        let partner = self.store.unlink_sae(sae)?;
        log::info!("Unpaired SAE {} from {}", sae, partner);
        Ok(partner)
    }

    /// Resolve the slave's KME and its paired master's KME
    pub fn resolve_route(&self, slave: &SaeId) -> KmeResult<Route> {
        let slave_record = self.store.sae(slave)?;
        let master_sae = slave_record
            .paired_with
            .ok_or_else(|| KmeError::no_pairing(&slave.to_string()))?;
        let master_record = self.store.sae(&master_sae)?;

        Ok(Route {
            source_kme: slave_record.kme_id,
            target_kme: master_record.kme_id,
            master_sae,
        })
    }

    /// Idempotent upsert of the (source, target) connection
    pub fn establish_kme_connection(
        &self,
        source: &KmeId,
        target: &KmeId,
        certificate: &[u8],
    ) -> KmeResult<KmeConnection> {
        self.store.kme(source)?;
        self.store.kme(target)?;

        let connection = self.store.upsert_connection(KmeConnection {
            source_kme: *source,
            target_kme: *target,
            certificate: certificate.to_vec(),
            updated_at: Utc::now(),
        })?;
        log::info!("KME connection {} -> {} established", source, target);
        Ok(connection)
    }

    /// Trust predicate between two KMEs
    ///
    /// Both KMEs must hold a non-empty certificate. Certificates are compared
    /// for equality in constant time; this stands in for chain validation.
    ///
    /// # Errors
    ///
    /// `CertificateMissing` if either KME has no certificate.
    pub fn validate_federation(&self, kme_a: &KmeId, kme_b: &KmeId) -> KmeResult<bool> {
        let a = self.store.kme(kme_a)?;
        let b = self.store.kme(kme_b)?;

        match (&a.certificate, &b.certificate) {
            (Some(cert_a), Some(cert_b)) if !cert_a.is_empty() && !cert_b.is_empty() => {
                Ok(cert_a.as_slice().ct_eq(cert_b.as_slice()).into())
            }
            _ => {
                let missing = if a.has_certificate() { kme_b } else { kme_a };
                log::warn!("Federation {} <-> {} refused: certificate missing", kme_a, kme_b);
                Err(KmeError::certificate_missing(&missing.to_string()))
            }
        }
    }

    /// [`PairingManager::validate_federation`] as a precondition
    ///
    /// # Errors
    ///
    /// `CertificateMissing` as above, `UntrustedPeer` if the certificates differ.
    pub fn ensure_federation(&self, source: &KmeId, target: &KmeId) -> KmeResult<()> {
        if self.validate_federation(source, target)? {
            Ok(())
        } else {
            Err(KmeError::UntrustedPeer {
                source_kme: source.to_string(),
                target_kme: target.to_string(),
                error_code: error_codes::CERTIFICATE_MISMATCH,
            })
        }
    }
}
