// End-to-end scenarios through the KME service operations

use std::sync::Arc;

use qkd_kme::error::error_codes;
use qkd_kme::model::{KeyMaterial, KeyRecord, KmeConnection};
use qkd_kme::prelude::*;
use qkd_kme::store::{BatchCommit, CommitOutcome};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

struct Deployment {
    service: KmeService,
    rng: ChaCha20Rng,
    kme: Kme,
    master: Sae,
    slave: Sae,
}

fn policy(max_key_count: u64) -> KmePolicy {
    KmePolicy {
        min_key_size: 8,
        max_key_count,
        max_additional_target_count: 2,
        ..KmePolicy::default()
    }
}

fn deploy(max_key_count: u64, pairing_policy: PairingPolicy) -> Deployment {
    let mut rng = ChaCha20Rng::seed_from_u64(1234);
    let config = KmeConfig {
        pairing_policy,
        ..KmeConfig::default().with_master_secret(&[0x5a; 32])
    };
    let service = KmeService::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(NoopRelay),
    )
    .unwrap();

    let kme = service
        .register_kme(&mut rng, "kme", "kme.local", Some(policy(max_key_count)), None)
        .unwrap();
    let master = service
        .register_sae(&mut rng, "master", &kme.id, true, None)
        .unwrap();
    let slave = service
        .register_sae(&mut rng, "slave", &kme.id, false, None)
        .unwrap();

    Deployment {
        service,
        rng,
        kme,
        master,
        slave,
    }
}

fn request(d: &Deployment, number: u32, size: u32) -> GenerateKeysRequest {
    GenerateKeysRequest {
        slave_sae_id: d.slave.id,
        master_sae_id: d.master.id,
        number: Some(number),
        size: Some(size),
        additional_targets: Vec::new(),
    }
}

#[test]
fn test_three_sixteen_bit_keys_for_paired_sae() {
    let mut d = deploy(100, PairingPolicy::Overwrite);
    let req = request(&d, 3, 16);
    let generated = d.service.generate_keys(&mut d.rng, &req).unwrap();

    assert_eq!(generated.keys.len(), 3);
    let status = d.service.get_status(&d.slave.id).unwrap();
    assert_eq!(status.stored_key_count, 3);
    assert_eq!(status.key_size, 16);
    assert_eq!(status.master_sae_id, d.master.id);
    assert_eq!(status.source_kme_id, d.kme.id);
    assert_eq!(status.target_kme_id, d.kme.id);

    let fetched = d.service.fetch_keys_for_consumer(&d.slave.id).unwrap();
    assert_eq!(fetched, generated);
}

#[test]
fn test_seventeen_bits_rejected_without_side_effects() {
    let mut d = deploy(100, PairingPolicy::Overwrite);
    let req = request(&d, 3, 17);
    let err = d.service.generate_keys(&mut d.rng, &req).unwrap_err();

    assert!(matches!(err, KmeError::InvalidParameter { .. }));
    assert!(d.service.fetch_keys_for_consumer(&d.slave.id).is_err());
    // Failed requests do not open a pairing either
    assert!(matches!(
        d.service.get_status(&d.slave.id),
        Err(KmeError::NoPairing { .. })
    ));
}

#[test]
fn test_capacity_overflow_is_all_or_nothing() {
    let mut d = deploy(5, PairingPolicy::Overwrite);
    let first = request(&d, 4, 16);
    d.service.generate_keys(&mut d.rng, &first).unwrap();

    let overflow = request(&d, 2, 16);
    let err = d.service.generate_keys(&mut d.rng, &overflow).unwrap_err();
    assert_eq!(err.error_code(), error_codes::STORED_KEY_LIMIT);

    let status = d.service.get_status(&d.slave.id).unwrap();
    assert_eq!(status.stored_key_count, 4);
    assert!(status.stored_key_count <= status.max_key_count);
    assert_eq!(d.service.fetch_keys_for_consumer(&d.slave.id).unwrap().keys.len(), 4);

    let exact_fit = request(&d, 1, 16);
    d.service.generate_keys(&mut d.rng, &exact_fit).unwrap();
    assert_eq!(d.service.get_status(&d.slave.id).unwrap().stored_key_count, 5);
}

#[test]
fn test_authorization_matrix() {
    let mut d = deploy(100, PairingPolicy::Overwrite);
    let extra = d
        .service
        .register_sae(&mut d.rng, "extra", &d.kme.id, false, None)
        .unwrap();
    let outsider = d
        .service
        .register_sae(&mut d.rng, "outsider", &d.kme.id, false, None)
        .unwrap();

    let mut req = request(&d, 2, 64);
    req.additional_targets = vec![extra.id];
    let generated = d.service.generate_keys(&mut d.rng, &req).unwrap();

    for container in &generated.keys {
        for (requester, allowed) in [
            (d.master.id, true),
            (d.slave.id, true),
            (extra.id, true),
            (outsider.id, false),
        ] {
            let result = d.service.fetch_key_by_id(&requester, &container.key_id);
            if allowed {
                assert_eq!(result.unwrap().key_id, container.key_id);
            } else {
                assert!(matches!(result, Err(KmeError::Unauthorized { .. })));
            }
        }
    }
}

#[test]
fn test_unknown_additional_target_fails_before_generation() {
    let mut d = deploy(100, PairingPolicy::Overwrite);
    let mut req = request(&d, 1, 16);
    req.additional_targets = vec![SaeId::random(&mut d.rng)];

    assert!(d.service.generate_keys(&mut d.rng, &req).unwrap_err().is_not_found());
    assert!(d.service.get_status(&d.slave.id).is_err());
}

#[test]
fn test_non_master_cannot_generate() {
    let mut d = deploy(100, PairingPolicy::Overwrite);
    let mut req = request(&d, 1, 16);
    req.master_sae_id = d.slave.id;
    req.slave_sae_id = d.master.id;

    let err = d.service.generate_keys(&mut d.rng, &req).unwrap_err();
    assert_eq!(err.error_code(), error_codes::NOT_A_MASTER);
}

#[test]
fn test_omitted_parameters_use_defaults() {
    let mut d = deploy(100, PairingPolicy::Overwrite);
    let req = GenerateKeysRequest {
        number: None,
        size: None,
        ..request(&d, 0, 0)
    };
    let generated = d.service.generate_keys(&mut d.rng, &req).unwrap();
    assert_eq!(generated.keys.len(), 1);
    assert_eq!(d.service.get_status(&d.slave.id).unwrap().key_size, 352);
}

#[test]
fn test_repairing_moves_the_slave_link() {
    let mut d = deploy(100, PairingPolicy::Overwrite);
    let other_slave = d
        .service
        .register_sae(&mut d.rng, "other", &d.kme.id, false, None)
        .unwrap();

    let req = request(&d, 1, 16);
    d.service.generate_keys(&mut d.rng, &req).unwrap();
    let mut moved = request(&d, 1, 16);
    moved.slave_sae_id = other_slave.id;
    d.service.generate_keys(&mut d.rng, &moved).unwrap();

    assert_eq!(
        d.service.get_status(&other_slave.id).unwrap().master_sae_id,
        d.master.id
    );
    assert!(matches!(
        d.service.get_status(&d.slave.id),
        Err(KmeError::NoPairing { .. })
    ));
    // Keys already issued to the old slave stay readable
    assert_eq!(d.service.fetch_keys_for_consumer(&d.slave.id).unwrap().keys.len(), 1);
}

#[test]
fn test_strict_pairing_policy() {
    let mut d = deploy(100, PairingPolicy::RequireUnpaired);
    let other_slave = d
        .service
        .register_sae(&mut d.rng, "other", &d.kme.id, false, None)
        .unwrap();

    let req = request(&d, 1, 16);
    d.service.generate_keys(&mut d.rng, &req).unwrap();
    d.service.generate_keys(&mut d.rng, &req).unwrap();

    let mut moved = request(&d, 1, 16);
    moved.slave_sae_id = other_slave.id;
    assert!(matches!(
        d.service.generate_keys(&mut d.rng, &moved),
        Err(KmeError::AlreadyPaired { .. })
    ));

    d.service.unpair(&d.slave.id).unwrap();
    d.service.generate_keys(&mut d.rng, &moved).unwrap();
}

#[test]
fn test_status_serializes_with_etsi_names() {
    let mut d = deploy(100, PairingPolicy::Overwrite);
    let req = request(&d, 1, 16);
    d.service.generate_keys(&mut d.rng, &req).unwrap();

    let json = serde_json::to_value(d.service.get_status(&d.slave.id).unwrap()).unwrap();
    for field in [
        "source_KME_ID",
        "target_KME_ID",
        "master_SAE_ID",
        "slave_SAE_ID",
        "key_size",
        "stored_key_count",
        "max_key_count",
        "max_key_per_request",
        "max_key_size",
        "min_key_size",
        "max_SAE_ID_count",
    ] {
        assert!(json.get(field).is_some(), "missing {}", field);
    }

    let keys = serde_json::to_value(d.service.fetch_keys_for_consumer(&d.slave.id).unwrap()).unwrap();
    assert!(keys["keys"][0].get("key_ID").is_some());
    assert!(keys["keys"][0].get("key").is_some());
}

#[test]
fn test_unknown_slave_status_is_not_found() {
    let mut d = deploy(100, PairingPolicy::Overwrite);
    let ghost = SaeId::random(&mut d.rng);
    assert!(d.service.get_status(&ghost).unwrap_err().is_not_found());
}

/// Store whose KME reads lag behind commits, as when another request
/// commits between the capacity pre-check and the batch commit
#[derive(Default)]
struct LaggingStore {
    inner: MemoryStore,
}

impl KmeStore for LaggingStore {
    fn insert_kme(&self, kme: Kme) -> KmeResult<()> {
        self.inner.insert_kme(kme)
    }

    fn insert_sae(&self, sae: Sae) -> KmeResult<()> {
        self.inner.insert_sae(sae)
    }

    fn kme(&self, id: &KmeId) -> KmeResult<Kme> {
        let mut kme = self.inner.kme(id)?;
        kme.stored_key_count = 0;
        Ok(kme)
    }

    fn sae(&self, id: &SaeId) -> KmeResult<Sae> {
        self.inner.sae(id)
    }

    fn link_saes(&self, master: &SaeId, slave: &SaeId, replace: bool) -> KmeResult<Vec<SaeId>> {
        self.inner.link_saes(master, slave, replace)
    }

    fn unlink_sae(&self, sae: &SaeId) -> KmeResult<SaeId> {
        self.inner.unlink_sae(sae)
    }

    fn commit_key_batch(&self, commit: BatchCommit<'_>) -> KmeResult<CommitOutcome> {
        self.inner.commit_key_batch(commit)
    }

    fn materials_for_consumer(&self, sae: &SaeId) -> KmeResult<Vec<KeyMaterial>> {
        self.inner.materials_for_consumer(sae)
    }

    fn key_record(&self, key_id: &KeyId) -> KmeResult<KeyRecord> {
        self.inner.key_record(key_id)
    }

    fn upsert_connection(&self, connection: KmeConnection) -> KmeResult<KmeConnection> {
        self.inner.upsert_connection(connection)
    }

    fn connection(&self, source: &KmeId, target: &KmeId) -> KmeResult<Option<KmeConnection>> {
        self.inner.connection(source, target)
    }

    fn connections(&self) -> KmeResult<Vec<KmeConnection>> {
        self.inner.connections()
    }
}

#[test]
fn test_commit_time_capacity_rejection_keeps_pairing() {
    let mut rng = ChaCha20Rng::seed_from_u64(99);
    let store = Arc::new(LaggingStore::default());
    let service = KmeService::new(
        KmeConfig::default().with_master_secret(&[0x33; 32]),
        store.clone(),
        Arc::new(NoopRelay),
    )
    .unwrap();

    let kme = service
        .register_kme(&mut rng, "kme", "kme.local", Some(policy(4)), None)
        .unwrap();
    let master = service.register_sae(&mut rng, "m", &kme.id, true, None).unwrap();
    let first_slave = service.register_sae(&mut rng, "s1", &kme.id, false, None).unwrap();
    let second_slave = service.register_sae(&mut rng, "s2", &kme.id, false, None).unwrap();

    let fill = GenerateKeysRequest {
        slave_sae_id: first_slave.id,
        master_sae_id: master.id,
        number: Some(4),
        size: Some(16),
        additional_targets: Vec::new(),
    };
    service.generate_keys(&mut rng, &fill).unwrap();

    let moved = GenerateKeysRequest {
        slave_sae_id: second_slave.id,
        number: Some(1),
        size: Some(64),
        ..fill
    };
    let err = service.generate_keys(&mut rng, &moved).unwrap_err();
    assert_eq!(err.error_code(), error_codes::STORED_KEY_LIMIT);

    let stored = store.inner.kme(&kme.id).unwrap();
    assert_eq!(stored.stored_key_count, 4);
    assert_eq!(stored.key_size, 16);
    assert_eq!(store.inner.sae(&first_slave.id).unwrap().paired_with, Some(master.id));
    assert_eq!(store.inner.sae(&master.id).unwrap().paired_with, Some(first_slave.id));
    assert!(!store.inner.sae(&second_slave.id).unwrap().is_paired());
}
