use std::collections::HashMap;

use parking_lot::RwLock;

use super::{BatchCommit, CommitOutcome, KmeStore, SaeLink};
use crate::error::{error_codes, KmeError, KmeResult};
use crate::model::{Kme, KmeConnection, KmeId, KeyId, KeyMaterial, KeyRecord, Sae, SaeId};

#[derive(Debug, Default)]
struct State {
    kmes: HashMap<KmeId, Kme>,
    saes: HashMap<SaeId, Sae>,
    /// Key records in commit order
    records: Vec<KeyRecord>,
    record_index: HashMap<KeyId, usize>,
    connections: HashMap<(KmeId, KmeId), KmeConnection>,
}

impl State {
    fn kme_mut(&mut self, id: &KmeId) -> KmeResult<&mut Kme> {
        self.kmes
            .get_mut(id)
            .ok_or_else(|| kme_not_found(id))
    }

    fn sae(&self, id: &SaeId) -> KmeResult<&Sae> {
        self.saes.get(id).ok_or_else(|| sae_not_found(id))
    }

    /// Check `link` against the current pairings
    ///
    /// Returns the `(sae, old partner)` pairs the link would break.
    fn plan_link(&self, link: &SaeLink) -> KmeResult<Vec<(SaeId, SaeId)>> {
        let master_partner = self.sae(&link.master)?.paired_with;
        let slave_partner = self.sae(&link.slave)?.paired_with;

        let mut detached = Vec::new();
        for (sae, partner, new_partner) in [
            (link.master, master_partner, link.slave),
            (link.slave, slave_partner, link.master),
        ] {
            if let Some(partner) = partner.filter(|p| *p != new_partner) {
                if !link.replace {
                    return Err(KmeError::already_paired(
                        &sae.to_string(),
                        &partner.to_string(),
                    ));
                }
                detached.push((sae, partner));
            }
        }
        Ok(detached)
    }

    fn apply_link(&mut self, link: &SaeLink, detached: &[(SaeId, SaeId)]) -> Vec<SaeId> {
        for (sae, partner) in detached {
            self.clear_back_link(partner, sae);
        }
        if let Some(record) = self.saes.get_mut(&link.master) {
            record.paired_with = Some(link.slave);
        }
        if let Some(record) = self.saes.get_mut(&link.slave) {
            record.paired_with = Some(link.master);
        }
        detached.iter().map(|(_, partner)| *partner).collect()
    }

    /// Clear `sae`'s link if it still points at `partner`
    fn clear_back_link(&mut self, sae: &SaeId, partner: &SaeId) {
        if let Some(record) = self.saes.get_mut(sae) {
            if record.paired_with.as_ref() == Some(partner) {
                record.paired_with = None;
            }
        }
    }
}

fn kme_not_found(id: &KmeId) -> KmeError {
    KmeError::not_found("KME", &id.to_string(), error_codes::KME_NOT_FOUND)
}

fn sae_not_found(id: &SaeId) -> KmeError {
    KmeError::not_found("SAE", &id.to_string(), error_codes::SAE_NOT_FOUND)
}

/// In-memory [`KmeStore`] guarded by a single `RwLock`
///
/// Each trait method takes the lock once, so every call is serializable
/// against every other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed key records
    pub fn key_count(&self) -> usize {
        self.state.read().records.len()
    }
}

impl KmeStore for MemoryStore {
    fn insert_kme(&self, kme: Kme) -> KmeResult<()> {
        self.state.write().kmes.insert(kme.id, kme);
        Ok(())
    }

    fn insert_sae(&self, sae: Sae) -> KmeResult<()> {
        let mut state = self.state.write();
        if !state.kmes.contains_key(&sae.kme_id) {
            return Err(kme_not_found(&sae.kme_id));
        }
        state.saes.insert(sae.id, sae);
        Ok(())
    }

    fn kme(&self, id: &KmeId) -> KmeResult<Kme> {
        self.state
            .read()
            .kmes
            .get(id)
            .cloned()
            .ok_or_else(|| kme_not_found(id))
    }

    fn sae(&self, id: &SaeId) -> KmeResult<Sae> {
        self.state.read().sae(id).cloned()
    }

    fn link_saes(&self, master: &SaeId, slave: &SaeId, replace: bool) -> KmeResult<Vec<SaeId>> {
        let mut state = self.state.write();
        let link = SaeLink {
            master: *master,
            slave: *slave,
            replace,
        };
        let detached = state.plan_link(&link)?;
        Ok(state.apply_link(&link, &detached))
    }

    fn unlink_sae(&self, sae: &SaeId) -> KmeResult<SaeId> {
        let mut state = self.state.write();
        let partner = state
            .sae(sae)?
            .paired_with
            .ok_or_else(|| KmeError::no_pairing(&sae.to_string()))?;

        state.clear_back_link(&partner, sae);
        if let Some(record) = state.saes.get_mut(sae) {
            record.paired_with = None;
        }
        Ok(partner)
    }

    fn commit_key_batch(&self, commit: BatchCommit<'_>) -> KmeResult<CommitOutcome> {
        let BatchCommit {
            kme_id,
            records,
            admit,
            link,
            key_size,
        } = commit;
        let mut state = self.state.write();
        let batch = records.len() as u64;

        let kme = state.kmes.get(&kme_id).ok_or_else(|| kme_not_found(&kme_id))?;
        admit(kme, batch)?;

        for record in &records {
            if record.key.key_id != record.material.key_id {
                return Err(KmeError::invalid_parameter(
                    "key_record",
                    "key and material sharing one identifier",
                    &format!("{} / {}", record.key.key_id, record.material.key_id),
                ));
            }
            if state.record_index.contains_key(&record.key.key_id) {
                return Err(KmeError::invalid_parameter(
                    "key_id",
                    "an identifier not yet in the store",
                    &record.key.key_id.to_string(),
                ));
            }
        }

        let planned = match &link {
            Some(link) => state.plan_link(link)?,
            None => Vec::new(),
        };

        // All checks passed
        let kme = state.kme_mut(&kme_id)?;
        kme.stored_key_count = kme.stored_key_count.saturating_add(batch);
        if let Some(key_size) = key_size {
            kme.key_size = key_size;
        }
        let stored_key_count = kme.stored_key_count;

        for record in records {
            let index = state.records.len();
            state.record_index.insert(record.key.key_id, index);
            state.records.push(record);
        }

        let detached = match &link {
            Some(link) => state.apply_link(link, &planned),
            None => Vec::new(),
        };

        Ok(CommitOutcome {
            stored_key_count,
            detached,
        })
    }

    fn materials_for_consumer(&self, sae: &SaeId) -> KmeResult<Vec<KeyMaterial>> {
        Ok(self
            .state
            .read()
            .records
            .iter()
            .filter(|record| record.material.consumers.contains(sae))
            .map(|record| record.material.clone())
            .collect())
    }

    fn key_record(&self, key_id: &KeyId) -> KmeResult<KeyRecord> {
        let state = self.state.read();
        state
            .record_index
            .get(key_id)
            .map(|&index| state.records[index].clone())
            .ok_or_else(|| {
                KmeError::not_found("Key", &key_id.to_string(), error_codes::KEY_NOT_FOUND)
            })
    }

    fn upsert_connection(&self, connection: KmeConnection) -> KmeResult<KmeConnection> {
        self.state.write().connections.insert(
            (connection.source_kme, connection.target_kme),
            connection.clone(),
        );
        Ok(connection)
    }

    fn connection(&self, source: &KmeId, target: &KmeId) -> KmeResult<Option<KmeConnection>> {
        Ok(self
            .state
            .read()
            .connections
            .get(&(*source, *target))
            .cloned())
    }

    fn connections(&self) -> KmeResult<Vec<KmeConnection>> {
        Ok(self.state.read().connections.values().cloned().collect())
    }
}
