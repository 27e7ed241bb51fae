/*!
 * Records managed by the Key Management Entity
 *
 * KMEs, SAEs, keys, key material and KME-to-KME connections. SAEs reference
 * each other by identifier only; the store is the arena that owns them.
 */

use std::fmt;

use chrono::{DateTime, Utc};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::KmePolicy;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Draw a fresh random (version 4) identifier from `rng`
            pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
                let mut bytes = [0u8; 16];
                rng.fill_bytes(&mut bytes);
                Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

record_id!(
    /// Identifier of a Key Management Entity
    KmeId
);
record_id!(
    /// Identifier of a Secure Application Entity
    SaeId
);
record_id!(
    /// Identifier shared by a [`Key`] and its [`KeyMaterial`] twin
    KeyId
);

/// A key-distribution node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kme {
    pub id: KmeId,
    pub name: String,
    /// Hostname or IP address of the key-ingestion endpoint
    pub hostname: String,
    /// Trust certificate presented to peer KMEs
    pub certificate: Option<Vec<u8>>,
    /// Current negotiated key length in bits
    pub key_size: u32,
    pub stored_key_count: u64,
    pub policy: KmePolicy,
}

impl Kme {
    /// Create a KME with the given policy. The negotiated key size starts at
    /// the policy's default.
    pub fn new(id: KmeId, name: &str, hostname: &str, policy: KmePolicy) -> Self {
        Self {
            id,
            name: name.to_string(),
            hostname: hostname.to_string(),
            certificate: None,
            key_size: policy.key_size,
            stored_key_count: 0,
            policy,
        }
    }

    pub fn with_certificate(mut self, certificate: &[u8]) -> Self {
        self.certificate = Some(certificate.to_vec());
        self
    }

    /// Whether the KME carries a usable (non-empty) certificate
    pub fn has_certificate(&self) -> bool {
        self.certificate.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Number of keys that can still be stored before `max_key_count`
    pub fn remaining_capacity(&self) -> u64 {
        self.policy.max_key_count.saturating_sub(self.stored_key_count)
    }
}

/// A client identity bound to exactly one KME
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sae {
    pub id: SaeId,
    pub name: String,
    pub kme_id: KmeId,
    /// Hex-encoded fingerprint of the SAE certificate, if one was issued
    pub certificate_fingerprint: Option<String>,
    pub is_master: bool,
    /// Partner SAE; always mirrored on the partner's record
    pub paired_with: Option<SaeId>,
}

impl Sae {
    pub fn new(id: SaeId, name: &str, kme_id: KmeId, is_master: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            kme_id,
            certificate_fingerprint: None,
            is_master,
            paired_with: None,
        }
    }

    /// Attach the SHA-256 fingerprint of a DER certificate
    pub fn with_certificate(mut self, certificate_der: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        self.certificate_fingerprint = Some(hex::encode(Sha256::digest(certificate_der)));
        self
    }

    pub fn is_paired(&self) -> bool {
        self.paired_with.is_some()
    }
}

/// Metadata of a generated key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub key_id: KeyId,
    /// Producer (master SAE)
    pub origin_sae: SaeId,
    /// Consumers; the mandatory slave comes first
    pub target_saes: Vec<SaeId>,
    /// Sifted length in bits
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

impl Key {
    /// Whether `sae` may read this key (origin or one of the targets)
    pub fn is_authorized(&self, sae: &SaeId) -> bool {
        self.origin_sae == *sae || self.target_saes.contains(sae)
    }
}

/// Wrapping key sealed under the KME vault key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedWrappingKey {
    /// Base64 nonce
    pub nonce: String,
    /// Base64 AES-GCM ciphertext of the 16-byte wrapping key
    pub ciphertext: String,
}

/// Encrypted, durable form of one generated key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub key_id: KeyId,
    /// Base64 ciphertext of the encoded sifted bits
    pub ciphertext: String,
    /// Base64 initialization vector
    pub iv: String,
    /// Version of the bit encoding inside the ciphertext
    pub encoding_version: u8,
    /// KME whose vault sealed the wrapping key
    pub sealed_by: KmeId,
    pub wrapping_key: SealedWrappingKey,
    /// SAEs authorized to consult this material
    pub consumers: Vec<SaeId>,
    pub created_at: DateTime<Utc>,
}

/// A key and its material, committed and read as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub key: Key,
    pub material: KeyMaterial,
}

/// Directed trust/relay edge between two KMEs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmeConnection {
    pub source_kme: KmeId,
    pub target_kme: KmeId,
    pub certificate: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

/// `{key_id, ciphertext}` pair handed back to SAEs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyContainer {
    #[serde(rename = "key_ID")]
    pub key_id: KeyId,
    #[serde(rename = "key")]
    pub ciphertext: String,
}

impl From<&KeyMaterial> for KeyContainer {
    fn from(material: &KeyMaterial) -> Self {
        Self {
            key_id: material.key_id,
            ciphertext: material.ciphertext.clone(),
        }
    }
}
