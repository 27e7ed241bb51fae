#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use qkd_kme::error::KmeError;
use qkd_kme::sifting::SiftedKey;
use qkd_kme::wrapper::{unwrap, wrap, WrappingKey};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

#[derive(Arbitrary, Debug)]
struct UnwrapFuzzInput {
    iv: String,
    ciphertext: String,
    wrapping_key: Vec<u8>,
    associated_data: Vec<u8>,
    bits: Vec<bool>,
    seed: u64,
}

fuzz_target!(|input: UnwrapFuzzInput| {
    // Garbage never yields plaintext and only fails with the documented errors
    match unwrap(
        &input.iv,
        &input.ciphertext,
        &input.wrapping_key,
        &input.associated_data,
    ) {
        Ok(_)
        | Err(KmeError::DecryptionError { .. })
        | Err(KmeError::IntegrityError { .. })
        | Err(KmeError::InvalidParameter { .. }) => {}
        Err(other) => panic!("unexpected error: {}", other),
    }

    let mut rng = ChaCha20Rng::seed_from_u64(input.seed);
    let key = SiftedKey::from_bits(input.bits.iter().map(|&b| b as u8).collect())
        .expect("bits are 0/1");
    let wrapping_key = WrappingKey::generate(&mut rng).expect("seeded rng");
    let wrapped = wrap(&mut rng, &key, &wrapping_key, &input.associated_data).expect("wrap");
    let unwrapped = unwrap(
        &wrapped.iv,
        &wrapped.ciphertext,
        wrapping_key.as_bytes(),
        &input.associated_data,
    )
    .expect("round trip");
    assert_eq!(unwrapped, key);
});
