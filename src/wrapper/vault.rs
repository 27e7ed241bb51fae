use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::wrapper::{fill_random, WrappingKey};
use crate::error::{error_codes, KmeError, KmeResult};
use crate::model::{KmeId, SealedWrappingKey};

const VAULT_SALT: &[u8] = b"qkd-kme/vault/v1";
const VAULT_NONCE_LEN: usize = 12;

/// Seals wrapping keys for storage next to the material they protect
///
/// One vault per KME, derived with HKDF-SHA256 from the master secret and
/// the KME identifier. The vault key lives only in memory.
#[derive(Clone)]
pub struct KeyVault {
    kme_id: KmeId,
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("kme_id", &self.kme_id)
            .field("cipher", &"[AES-256-GCM Cipher]")
            .finish()
    }
}

impl KeyVault {
    /// Derive the vault for `kme_id` from `master_secret`
    pub fn derive(master_secret: &[u8], kme_id: &KmeId) -> KmeResult<Self> {
        let hkdf = Hkdf::<Sha256>::new(Some(VAULT_SALT), master_secret);
        let mut okm = Zeroizing::new([0u8; 32]);
        hkdf.expand(kme_id.as_uuid().as_bytes(), &mut okm[..])
            .map_err(|e| {
                KmeError::encryption_error(
                    "derive_vault",
                    &e.to_string(),
                    error_codes::VAULT_KEY_DERIVATION_FAILED,
                )
            })?;

        let key = Key::<Aes256Gcm>::from_slice(&okm[..]);
        Ok(Self {
            kme_id: *kme_id,
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn kme_id(&self) -> &KmeId {
        &self.kme_id
    }

    /// Seal a wrapping key. The KME identifier is bound as associated data.
    pub fn seal<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        wrapping_key: &WrappingKey,
    ) -> KmeResult<SealedWrappingKey> {
        let mut nonce = [0u8; VAULT_NONCE_LEN];
        fill_random(rng, &mut nonce)?;

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: wrapping_key.as_bytes(),
                    aad: self.kme_id.as_uuid().as_bytes(),
                },
            )
            .map_err(|e| {
                KmeError::encryption_error(
                    "seal_wrapping_key",
                    &format!("AES-GCM encryption failed: {}", e),
                    error_codes::ENCRYPTION_FAILED,
                )
            })?;

        Ok(SealedWrappingKey {
            nonce: base64::encode(nonce),
            ciphertext: base64::encode(ciphertext),
        })
    }

    /// Recover a wrapping key sealed by this vault
    ///
    /// # Errors
    ///
    /// `DecryptionError` for a malformed nonce, `IntegrityError` if the
    /// sealed key was altered or sealed by another KME's vault.
    pub fn open(&self, sealed: &SealedWrappingKey) -> KmeResult<WrappingKey> {
        let nonce = base64::decode(&sealed.nonce)
            .ok()
            .filter(|n| n.len() == VAULT_NONCE_LEN)
            .ok_or_else(|| {
                KmeError::decryption_error(
                    "open_wrapping_key",
                    "malformed nonce",
                    error_codes::IV_MALFORMED,
                )
            })?;
        let ciphertext = base64::decode(&sealed.ciphertext).map_err(|e| {
            KmeError::integrity_error(
                "open_wrapping_key",
                &format!("sealed key is not valid base64: {}", e),
                error_codes::CIPHERTEXT_DECODING_FAILED,
            )
        })?;

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &ciphertext,
                        aad: self.kme_id.as_uuid().as_bytes(),
                    },
                )
                .map_err(|_| {
                    KmeError::integrity_error(
                        "open_wrapping_key",
                        "authentication tag mismatch",
                        error_codes::AUTHENTICATION_FAILED,
                    )
                })?,
        );

        WrappingKey::from_slice(&plaintext)
    }
}
