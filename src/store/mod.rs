/*!
 * Durable store port
 *
 * The lifecycle and pairing managers talk to persistence only through
 * [`KmeStore`]. Every method is one atomic transaction: a failed call leaves
 * no partial state behind, and concurrent readers never see a half-written
 * key batch or a one-directional pairing.
 */

mod memory;

pub use memory::MemoryStore;

use crate::error::KmeResult;
use crate::model::{Kme, KmeConnection, KmeId, KeyId, KeyMaterial, KeyRecord, Sae, SaeId};

/// Admission check run inside the batch commit, given the KME as currently
/// stored and the number of records about to be inserted
pub type AdmissionCheck<'a> = &'a dyn Fn(&Kme, u64) -> KmeResult<()>;

/// Pairing applied in the same transaction as a key batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaeLink {
    pub master: SaeId,
    pub slave: SaeId,
    /// Detach existing partners instead of failing with `AlreadyPaired`
    pub replace: bool,
}

/// One atomic batch commit
///
/// The records, the `stored_key_count` increment, the optional pairing and
/// the optional key size update are applied together once `admit` passes,
/// or not at all.
pub struct BatchCommit<'a> {
    pub kme_id: KmeId,
    pub records: Vec<KeyRecord>,
    pub admit: AdmissionCheck<'a>,
    pub link: Option<SaeLink>,
    pub key_size: Option<u32>,
}

impl<'a> BatchCommit<'a> {
    pub fn new(kme_id: KmeId, records: Vec<KeyRecord>, admit: AdmissionCheck<'a>) -> Self {
        Self {
            kme_id,
            records,
            admit,
            link: None,
            key_size: None,
        }
    }

    pub fn with_link(mut self, link: Option<SaeLink>) -> Self {
        self.link = link;
        self
    }

    pub fn with_key_size(mut self, key_size: u32) -> Self {
        self.key_size = Some(key_size);
        self
    }
}

/// What a successful batch commit changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Stored key count of the KME after the commit
    pub stored_key_count: u64,
    /// Previous partners detached by the pairing, if any
    pub detached: Vec<SaeId>,
}

/// Transactional persistence for KMEs, SAEs, key records and connections
pub trait KmeStore: Send + Sync {
    /// Insert or replace a KME record
    fn insert_kme(&self, kme: Kme) -> KmeResult<()>;

    /// Insert or replace an SAE record; its KME must already exist
    fn insert_sae(&self, sae: Sae) -> KmeResult<()>;

    fn kme(&self, id: &KmeId) -> KmeResult<Kme>;

    fn sae(&self, id: &SaeId) -> KmeResult<Sae>;

    /// Link `master` and `slave` in both directions
    ///
    /// Previous partners of either side have their back-link cleared and are
    /// returned. With `replace == false` an existing different partner fails
    /// with `AlreadyPaired` and nothing changes.
    fn link_saes(&self, master: &SaeId, slave: &SaeId, replace: bool) -> KmeResult<Vec<SaeId>>;

    /// Clear the pairing of `sae` on both sides and return the former partner
    fn unlink_sae(&self, sae: &SaeId) -> KmeResult<SaeId>;

    /// Commit a batch of key records against `commit.kme_id`
    ///
    /// `admit`, the pairing check and every write run in a single critical
    /// section. See [`BatchCommit`].
    fn commit_key_batch(&self, commit: BatchCommit<'_>) -> KmeResult<CommitOutcome>;

    /// All key material whose consumer set contains `sae`, oldest first
    fn materials_for_consumer(&self, sae: &SaeId) -> KmeResult<Vec<KeyMaterial>>;

    fn key_record(&self, key_id: &KeyId) -> KmeResult<KeyRecord>;

    /// Insert or overwrite the connection for its ordered (source, target) pair
    fn upsert_connection(&self, connection: KmeConnection) -> KmeResult<KmeConnection>;

    fn connection(&self, source: &KmeId, target: &KmeId) -> KmeResult<Option<KmeConnection>>;

    fn connections(&self) -> KmeResult<Vec<KmeConnection>>;
}
