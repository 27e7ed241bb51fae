use std::sync::Arc;

use qkd_kme::prelude::*;
use rand::rngs::OsRng;

fn main() -> KmeResult<()> {
    println!("Running a local QKD key management entity...");

    let config = match KmeConfig::default_path().filter(|path| path.exists()) {
        Some(path) => {
            println!("Using configuration from {}", path.display());
            KmeConfig::load(&path)?
        }
        None => KmeConfig::default().with_master_secret(&rand::random::<[u8; 32]>()),
    };

    let service = KmeService::new(config, Arc::new(MemoryStore::new()), Arc::new(NoopRelay))?;
    let mut rng = OsRng;

    demo_local_exchange(&service, &mut rng)?;
    demo_federated_exchange(&service, &mut rng)?;
    Ok(())
}

fn demo_local_exchange(service: &KmeService, rng: &mut OsRng) -> KmeResult<()> {
    println!("\n=== Local exchange ===");

    let kme = service.register_kme(rng, "kme-alpha", "alpha.local", None, None)?;
    let master = service.register_sae(rng, "sae-master", &kme.id, true, None)?;
    let slave = service.register_sae(rng, "sae-slave", &kme.id, false, None)?;

    let batch = service.generate_keys(
        rng,
        &GenerateKeysRequest {
            slave_sae_id: slave.id,
            master_sae_id: master.id,
            number: Some(3),
            size: Some(256),
            additional_targets: Vec::new(),
        },
    )?;
    println!("Generated {} keys", batch.keys.len());

    let status = service.get_status(&slave.id)?;
    println!(
        "Status: key_size={} stored={}/{}",
        status.key_size, status.stored_key_count, status.max_key_count
    );

    let fetched = service.fetch_keys_for_consumer(&slave.id)?;
    for container in &fetched.keys {
        let plain = service.fetch_key_by_id(&slave.id, &container.key_id)?;
        println!("  {} -> {} sifted bits", container.key_id, plain.bits.len());
    }

    match service.fetch_key_by_id(&SaeId::random(rng), &fetched.keys[0].key_id) {
        Err(e) => println!("✓ Stranger rejected: {}", e.user_friendly_message()),
        Ok(_) => println!("✗ Stranger was able to read a key"),
    }

    Ok(())
}

fn demo_federated_exchange(service: &KmeService, rng: &mut OsRng) -> KmeResult<()> {
    println!("\n=== Federated exchange ===");

    let certificate = b"shared-federation-anchor";
    let kme_a = service.register_kme(rng, "kme-a", "a.example", None, Some(certificate))?;
    let kme_b = service.register_kme(rng, "kme-b", "b.example", None, Some(certificate))?;
    let master = service.register_sae(rng, "sae-a", &kme_a.id, true, None)?;
    let slave = service.register_sae(rng, "sae-b", &kme_b.id, false, None)?;

    let batch = service.generate_keys(
        rng,
        &GenerateKeysRequest {
            slave_sae_id: slave.id,
            master_sae_id: master.id,
            number: Some(2),
            size: None,
            additional_targets: Vec::new(),
        },
    )?;
    println!("Generated {} keys at {} for a slave on {}", batch.keys.len(), kme_a.hostname, kme_b.hostname);

    let status = service.get_status(&slave.id)?;
    println!("Status: source={} target={}", status.source_kme_id, status.target_kme_id);

    Ok(())
}
