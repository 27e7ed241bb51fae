use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Key, Nonce,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::encoding::{decode_bits, encode_bits};
use crate::error::{error_codes, KmeError, KmeResult};
use crate::sifting::SiftedKey;

/// Wrapping key length in bytes
pub const WRAPPING_KEY_LEN: usize = 16;

/// AES-GCM initialization vector length in bytes
pub const IV_LEN: usize = 12;

/// 16-byte symmetric key used to wrap sifted keys
///
/// Zeroed on drop; `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WrappingKey([u8; WRAPPING_KEY_LEN]);

impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WrappingKey").field(&"[REDACTED]").finish()
    }
}

impl WrappingKey {
    /// Draw a fresh random wrapping key
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> KmeResult<Self> {
        let mut key = Self([0u8; WRAPPING_KEY_LEN]);
        fill_random(rng, &mut key.0)?;
        Ok(key)
    }

    /// # Errors
    ///
    /// `DecryptionError` if `bytes` is not exactly 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> KmeResult<Self> {
        let array: [u8; WRAPPING_KEY_LEN] = bytes.try_into().map_err(|_| {
            KmeError::decryption_error(
                "wrapping_key",
                &format!("expected {} bytes, got {}", WRAPPING_KEY_LEN, bytes.len()),
                error_codes::WRAPPING_KEY_MALFORMED,
            )
        })?;
        Ok(Self(array))
    }

    pub fn from_base64(encoded: &str) -> KmeResult<Self> {
        let bytes = Zeroizing::new(base64::decode(encoded).map_err(|e| {
            KmeError::decryption_error(
                "wrapping_key",
                &format!("invalid base64: {}", e),
                error_codes::WRAPPING_KEY_MALFORMED,
            )
        })?);
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; WRAPPING_KEY_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(base64::encode(&self.0))
    }
}

/// Base64 `{iv, ciphertext}` produced by [`KeyWrapper::wrap`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub iv: String,
    pub ciphertext: String,
}

/// AES-128-GCM wrapper bound to one wrapping key
///
/// # Examples
///
/// ```
/// use qkd_kme::sifting::SiftedKey;
/// use qkd_kme::wrapper::{KeyWrapper, WrappingKey};
/// use rand::rngs::OsRng;
///
/// let wrapping_key = WrappingKey::generate(&mut OsRng).unwrap();
/// let wrapper = KeyWrapper::new(&wrapping_key);
///
/// let key = SiftedKey::from_bits(vec![1, 0, 1, 1, 0]).unwrap();
/// let wrapped = wrapper.wrap(&mut OsRng, &key, b"key-id").unwrap();
/// let unwrapped = wrapper.unwrap(&wrapped.iv, &wrapped.ciphertext, b"key-id").unwrap();
/// assert_eq!(unwrapped, key);
/// ```
#[derive(Clone)]
pub struct KeyWrapper {
    cipher: Aes128Gcm,
}

impl std::fmt::Debug for KeyWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyWrapper")
            .field("cipher", &"[AES-128-GCM Cipher]")
            .finish()
    }
}

impl KeyWrapper {
    pub fn new(wrapping_key: &WrappingKey) -> Self {
        let key = Key::<Aes128Gcm>::from_slice(wrapping_key.as_bytes());
        Self {
            cipher: Aes128Gcm::new(key),
        }
    }

    /// Encrypt `key` under a fresh random IV
    ///
    /// `associated_data` is authenticated but not encrypted; the lifecycle
    /// manager binds the key identifier here so material cannot be swapped
    /// between records.
    pub fn wrap<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        key: &SiftedKey,
        associated_data: &[u8],
    ) -> KmeResult<WrappedKey> {
        let plaintext = Zeroizing::new(encode_bits(key.bits())?);

        let mut iv = [0u8; IV_LEN];
        fill_random(rng, &mut iv)?;

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|e| {
                KmeError::encryption_error(
                    "wrap",
                    &format!("AES-GCM encryption failed: {}", e),
                    error_codes::ENCRYPTION_FAILED,
                )
            })?;

        Ok(WrappedKey {
            iv: base64::encode(iv),
            ciphertext: base64::encode(ciphertext),
        })
    }

    /// Reverse [`KeyWrapper::wrap`]
    ///
    /// # Errors
    ///
    /// * `DecryptionError` if the IV is not valid base64 or not 12 bytes
    /// * `IntegrityError` if the ciphertext is not valid base64, fails
    ///   authentication, or does not hold a valid bit encoding
    pub fn unwrap(
        &self,
        iv: &str,
        ciphertext: &str,
        associated_data: &[u8],
    ) -> KmeResult<SiftedKey> {
        let iv = decode_iv(iv)?;
        let ciphertext = base64::decode(ciphertext).map_err(|e| {
            KmeError::integrity_error(
                "unwrap",
                &format!("ciphertext is not valid base64: {}", e),
                error_codes::CIPHERTEXT_DECODING_FAILED,
            )
        })?;

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(
                    Nonce::from_slice(&iv),
                    Payload {
                        msg: &ciphertext,
                        aad: associated_data,
                    },
                )
                .map_err(|_| {
                    KmeError::integrity_error(
                        "unwrap",
                        "authentication tag mismatch",
                        error_codes::AUTHENTICATION_FAILED,
                    )
                })?,
        );

        SiftedKey::from_bits(decode_bits(&plaintext)?)
    }
}

pub(crate) fn fill_random<R: RngCore + CryptoRng>(rng: &mut R, dest: &mut [u8]) -> KmeResult<()> {
    rng.try_fill_bytes(dest)
        .map_err(|e| KmeError::RandomGenerationError {
            cause: e.to_string(),
            error_code: error_codes::RNG_FAILED,
        })
}

fn decode_iv(iv: &str) -> KmeResult<[u8; IV_LEN]> {
    let bytes = base64::decode(iv).map_err(|e| {
        KmeError::decryption_error(
            "unwrap",
            &format!("iv is not valid base64: {}", e),
            error_codes::IV_MALFORMED,
        )
    })?;
    bytes.as_slice().try_into().map_err(|_| {
        KmeError::decryption_error(
            "unwrap",
            &format!("expected {}-byte iv, got {}", IV_LEN, bytes.len()),
            error_codes::IV_MALFORMED,
        )
    })
}

/// Convenience function to wrap a sifted key in a single call
pub fn wrap<R: RngCore + CryptoRng>(
    rng: &mut R,
    key: &SiftedKey,
    wrapping_key: &WrappingKey,
    associated_data: &[u8],
) -> KmeResult<WrappedKey> {
    KeyWrapper::new(wrapping_key).wrap(rng, key, associated_data)
}

/// Convenience function to unwrap with raw wrapping key bytes
///
/// # Errors
///
/// `DecryptionError` if `wrapping_key` is not 16 bytes, otherwise as
/// [`KeyWrapper::unwrap`].
pub fn unwrap(
    iv: &str,
    ciphertext: &str,
    wrapping_key: &[u8],
    associated_data: &[u8],
) -> KmeResult<SiftedKey> {
    let wrapping_key = WrappingKey::from_slice(wrapping_key)?;
    KeyWrapper::new(&wrapping_key).unwrap(iv, ciphertext, associated_data)
}
