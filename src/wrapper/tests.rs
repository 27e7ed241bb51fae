use super::*;
use crate::error::KmeError;
use crate::model::KmeId;
use crate::sifting::SiftedKey;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

fn rng() -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(0x5eed)
}

#[test]
fn test_encoding_keeps_leading_zeros_and_length() {
    let bits = vec![0, 0, 0, 1, 0, 1, 1, 0, 1, 0, 1];
    let encoded = encode_bits(&bits).unwrap();
    assert_eq!(encoded[0], ENCODING_V1);
    assert_eq!(&encoded[1..5], &11u32.to_be_bytes());
    assert_eq!(&encoded[5..], &[0b0001_0110, 0b1010_0000]);
    assert_eq!(decode_bits(&encoded).unwrap(), bits);
}

#[test]
fn test_encoding_empty_key() {
    let encoded = encode_bits(&[]).unwrap();
    assert_eq!(encoded.len(), 5);
    assert!(decode_bits(&encoded).unwrap().is_empty());
}

#[test]
fn test_decoding_rejects_malformed_input() {
    let good = encode_bits(&[1, 0, 1]).unwrap();

    let mut wrong_version = good.clone();
    wrong_version[0] = 2;
    let mut dirty_padding = good.clone();
    dirty_padding[5] |= 0x01;
    let truncated = &good[..3];
    let mut long_body = good.clone();
    long_body.push(0);

    for bad in [&wrong_version[..], &dirty_padding[..], truncated, &long_body[..]] {
        assert!(matches!(
            decode_bits(bad),
            Err(KmeError::IntegrityError { .. })
        ));
    }
}

#[test]
fn test_wrap_unwrap_round_trip() {
    let mut rng = rng();
    let wrapping_key = WrappingKey::generate(&mut rng).unwrap();
    let key = SiftedKey::from_bits(vec![1, 0, 1, 1, 0, 0, 1, 0, 1]).unwrap();

    let wrapped = wrap(&mut rng, &key, &wrapping_key, b"id").unwrap();
    let unwrapped = unwrap(&wrapped.iv, &wrapped.ciphertext, wrapping_key.as_bytes(), b"id").unwrap();
    assert_eq!(unwrapped, key);
}

#[test]
fn test_wrap_is_fresh_each_call() {
    let mut rng = rng();
    let wrapping_key = WrappingKey::generate(&mut rng).unwrap();
    let wrapper = KeyWrapper::new(&wrapping_key);
    let key = SiftedKey::from_bits(vec![1; 16]).unwrap();

    let first = wrapper.wrap(&mut rng, &key, b"").unwrap();
    let second = wrapper.wrap(&mut rng, &key, b"").unwrap();
    assert_ne!(first.iv, second.iv);
    assert_ne!(first.ciphertext, second.ciphertext);
}

#[test]
fn test_tampered_ciphertext_is_integrity_error() {
    let mut rng = rng();
    let wrapping_key = WrappingKey::generate(&mut rng).unwrap();
    let wrapper = KeyWrapper::new(&wrapping_key);
    let key = SiftedKey::from_bits(vec![0, 1, 1, 0, 1, 0, 0, 1]).unwrap();
    let wrapped = wrapper.wrap(&mut rng, &key, b"id").unwrap();

    let mut raw = base64::decode(&wrapped.ciphertext).unwrap();
    raw[0] ^= 0x01;
    let tampered = base64::encode(raw);

    assert!(matches!(
        wrapper.unwrap(&wrapped.iv, &tampered, b"id"),
        Err(KmeError::IntegrityError { .. })
    ));
    assert!(matches!(
        wrapper.unwrap(&wrapped.iv, "not base64!!", b"id"),
        Err(KmeError::IntegrityError { .. })
    ));
}

#[test]
fn test_associated_data_binds_record() {
    let mut rng = rng();
    let wrapping_key = WrappingKey::generate(&mut rng).unwrap();
    let wrapper = KeyWrapper::new(&wrapping_key);
    let key = SiftedKey::from_bits(vec![1, 1, 0, 0]).unwrap();
    let wrapped = wrapper.wrap(&mut rng, &key, b"key-a").unwrap();

    assert!(matches!(
        wrapper.unwrap(&wrapped.iv, &wrapped.ciphertext, b"key-b"),
        Err(KmeError::IntegrityError { .. })
    ));
}

#[test]
fn test_wrong_wrapping_key_is_integrity_error() {
    let mut rng = rng();
    let key = SiftedKey::from_bits(vec![1, 0]).unwrap();
    let right = WrappingKey::generate(&mut rng).unwrap();
    let wrong = WrappingKey::generate(&mut rng).unwrap();
    let wrapped = wrap(&mut rng, &key, &right, b"").unwrap();

    assert!(matches!(
        unwrap(&wrapped.iv, &wrapped.ciphertext, wrong.as_bytes(), b""),
        Err(KmeError::IntegrityError { .. })
    ));
}

#[test]
fn test_malformed_key_or_iv_is_decryption_error() {
    let mut rng = rng();
    let key = SiftedKey::from_bits(vec![1, 0]).unwrap();
    let wrapping_key = WrappingKey::generate(&mut rng).unwrap();
    let wrapped = wrap(&mut rng, &key, &wrapping_key, b"").unwrap();

    assert!(matches!(
        unwrap(&wrapped.iv, &wrapped.ciphertext, &[0u8; 15], b""),
        Err(KmeError::DecryptionError { .. })
    ));
    assert!(matches!(
        unwrap(&base64::encode([0u8; 8]), &wrapped.ciphertext, wrapping_key.as_bytes(), b""),
        Err(KmeError::DecryptionError { .. })
    ));
    assert!(matches!(
        unwrap("%%%", &wrapped.ciphertext, wrapping_key.as_bytes(), b""),
        Err(KmeError::DecryptionError { .. })
    ));
    assert!(matches!(
        WrappingKey::from_base64("AAAA"),
        Err(KmeError::DecryptionError { .. })
    ));
}

#[test]
fn test_wrapping_key_base64_round_trip_and_redacted_debug() {
    let mut rng = rng();
    let wrapping_key = WrappingKey::generate(&mut rng).unwrap();
    let restored = WrappingKey::from_base64(&wrapping_key.to_base64()).unwrap();
    assert_eq!(restored, wrapping_key);
    assert!(format!("{:?}", wrapping_key).contains("REDACTED"));
}

#[test]
fn test_vault_seal_open() {
    let mut rng = rng();
    let kme = KmeId::random(&mut rng);
    let vault = KeyVault::derive(&[7u8; 32], &kme).unwrap();
    let wrapping_key = WrappingKey::generate(&mut rng).unwrap();

    let sealed = vault.seal(&mut rng, &wrapping_key).unwrap();
    assert_ne!(sealed.ciphertext, *wrapping_key.to_base64());
    assert_eq!(vault.open(&sealed).unwrap(), wrapping_key);

    // Same secret, same KME: a restarted process can open old records
    let again = KeyVault::derive(&[7u8; 32], &kme).unwrap();
    assert_eq!(again.open(&sealed).unwrap(), wrapping_key);
}

#[test]
fn test_vault_is_scoped_to_kme_and_secret() {
    let mut rng = rng();
    let kme_a = KmeId::random(&mut rng);
    let kme_b = KmeId::random(&mut rng);
    let vault_a = KeyVault::derive(&[7u8; 32], &kme_a).unwrap();
    let vault_b = KeyVault::derive(&[7u8; 32], &kme_b).unwrap();
    let other_secret = KeyVault::derive(&[8u8; 32], &kme_a).unwrap();

    let wrapping_key = WrappingKey::generate(&mut rng).unwrap();
    let sealed = vault_a.seal(&mut rng, &wrapping_key).unwrap();
    assert!(matches!(vault_b.open(&sealed), Err(KmeError::IntegrityError { .. })));
    assert!(matches!(other_secret.open(&sealed), Err(KmeError::IntegrityError { .. })));
}

proptest! {
    #[test]
    fn prop_wrap_round_trip(bits in proptest::collection::vec(0u8..=1, 0..1024), seed in any::<u64>()) {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let wrapping_key = WrappingKey::generate(&mut rng).unwrap();
        let key = SiftedKey::from_bits(bits).unwrap();
        let wrapped = wrap(&mut rng, &key, &wrapping_key, b"aad").unwrap();
        let unwrapped = unwrap(&wrapped.iv, &wrapped.ciphertext, wrapping_key.as_bytes(), b"aad").unwrap();
        prop_assert_eq!(unwrapped, key);
    }
}
