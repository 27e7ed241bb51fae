// Cross-KME generation: federation checks, connection upsert and relay

use std::sync::Arc;

use qkd_kme::error::error_codes;
use qkd_kme::prelude::*;
use qkd_kme::wrapper::{unwrap, WrappingKey};
use qkd_kme::{KmeResult, RelayRequest};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

struct Federation {
    service: KmeService,
    store: Arc<MemoryStore>,
    relay: Arc<RecordingRelay>,
    rng: ChaCha20Rng,
    kme_a: Kme,
    kme_b: Kme,
    master: Sae,
    slave: Sae,
}

fn federation(cert_a: Option<&[u8]>, cert_b: Option<&[u8]>) -> Federation {
    let mut rng = ChaCha20Rng::seed_from_u64(77);
    let store = Arc::new(MemoryStore::new());
    let relay = Arc::new(RecordingRelay::new());
    let service = KmeService::new(
        KmeConfig::default().with_master_secret(&[0x11; 32]),
        store.clone(),
        relay.clone(),
    )
    .unwrap();

    let kme_a = service
        .register_kme(&mut rng, "kme-a", "a.example", None, cert_a)
        .unwrap();
    let kme_b = service
        .register_kme(&mut rng, "kme-b", "b.example", None, cert_b)
        .unwrap();
    let master = service
        .register_sae(&mut rng, "master", &kme_a.id, true, None)
        .unwrap();
    let slave = service
        .register_sae(&mut rng, "slave", &kme_b.id, false, None)
        .unwrap();

    Federation {
        service,
        store,
        relay,
        rng,
        kme_a,
        kme_b,
        master,
        slave,
    }
}

fn request(f: &Federation) -> GenerateKeysRequest {
    GenerateKeysRequest {
        slave_sae_id: f.slave.id,
        master_sae_id: f.master.id,
        number: Some(2),
        size: Some(128),
        additional_targets: Vec::new(),
    }
}

#[test]
fn test_cross_kme_generation_commits_at_master_and_relays() {
    let mut f = federation(Some(b"anchor"), Some(b"anchor"));
    let req = request(&f);
    let generated = f.service.generate_keys(&mut f.rng, &req).unwrap();
    assert_eq!(generated.keys.len(), 2);

    assert_eq!(f.store.kme(&f.kme_a.id).unwrap().stored_key_count, 2);
    assert_eq!(f.store.kme(&f.kme_b.id).unwrap().stored_key_count, 0);

    let connection = f.store.connection(&f.kme_a.id, &f.kme_b.id).unwrap().unwrap();
    assert_eq!(connection.certificate, b"anchor".to_vec());

    let status = f.service.get_status(&f.slave.id).unwrap();
    assert_eq!(status.source_kme_id, f.kme_b.id);
    assert_eq!(status.target_kme_id, f.kme_a.id);
    assert_eq!(status.stored_key_count, 2);

    let sent = f.relay.requests();
    assert_eq!(sent.len(), 1);
    let (peer, relayed) = &sent[0];
    assert_eq!(peer.id, f.kme_b.id);
    assert_eq!(relayed.slave_sae_id, f.slave.id);
    assert_eq!(relayed.keys.len(), 2);

    // The peer can open the relayed batch with the shipped wrapping key
    let wrapping_key = WrappingKey::from_base64(&relayed.wrapping_key).unwrap();
    for key in &relayed.keys {
        let bits = unwrap(
            &key.iv,
            &key.ciphertext,
            wrapping_key.as_bytes(),
            key.key_id.as_uuid().as_bytes(),
        )
        .unwrap();
        let local = f.service.fetch_key_by_id(&f.slave.id, &key.key_id).unwrap();
        assert_eq!(bits, local.bits);
    }
}

#[test]
fn test_missing_certificate_blocks_relay() {
    let mut f = federation(Some(b"anchor"), None);
    let req = request(&f);
    let err = f.service.generate_keys(&mut f.rng, &req).unwrap_err();

    assert!(matches!(err, KmeError::CertificateMissing { .. }));
    assert!(f.relay.requests().is_empty());
    assert!(f.store.connections().unwrap().is_empty());
    assert_eq!(f.store.kme(&f.kme_a.id).unwrap().stored_key_count, 0);
    assert!(!f.store.sae(&f.slave.id).unwrap().is_paired());
}

#[test]
fn test_mismatched_certificates_are_untrusted() {
    let mut f = federation(Some(b"anchor-a"), Some(b"anchor-b"));
    let req = request(&f);
    let err = f.service.generate_keys(&mut f.rng, &req).unwrap_err();

    assert_eq!(err.error_code(), error_codes::CERTIFICATE_MISMATCH);
    assert!(f.relay.requests().is_empty());
}

struct DownRelay;

impl RelayClient for DownRelay {
    fn push_batch(&self, peer: &Kme, _request: &RelayRequest) -> KmeResult<()> {
        Err(KmeError::relay_error(&peer.hostname, "timed out"))
    }
}

#[test]
fn test_relay_failure_does_not_undo_commit() {
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let service = KmeService::new(
        KmeConfig::default().with_master_secret(&[0x22; 32]),
        Arc::new(MemoryStore::new()),
        Arc::new(DownRelay),
    )
    .unwrap();
    let kme_a = service
        .register_kme(&mut rng, "a", "a.example", None, Some(b"anchor"))
        .unwrap();
    let kme_b = service
        .register_kme(&mut rng, "b", "b.example", None, Some(b"anchor"))
        .unwrap();
    let master = service.register_sae(&mut rng, "m", &kme_a.id, true, None).unwrap();
    let slave = service.register_sae(&mut rng, "s", &kme_b.id, false, None).unwrap();

    let generated = service
        .generate_keys(
            &mut rng,
            &GenerateKeysRequest {
                slave_sae_id: slave.id,
                master_sae_id: master.id,
                number: Some(1),
                size: None,
                additional_targets: Vec::new(),
            },
        )
        .unwrap();

    assert_eq!(generated.keys.len(), 1);
    assert_eq!(service.get_status(&slave.id).unwrap().stored_key_count, 1);
}

#[test]
fn test_connect_kmes_upserts() {
    let f = federation(None, None);
    f.service.connect_kmes(&f.kme_a.id, &f.kme_b.id, b"first").unwrap();
    f.service.connect_kmes(&f.kme_a.id, &f.kme_b.id, b"second").unwrap();
    f.service.connect_kmes(&f.kme_b.id, &f.kme_a.id, b"reverse").unwrap();

    assert_eq!(f.store.connections().unwrap().len(), 2);
    assert_eq!(
        f.store.connection(&f.kme_a.id, &f.kme_b.id).unwrap().unwrap().certificate,
        b"second".to_vec()
    );
}
