/*!
 * Error Handling for the Key Management Entity
 *
 * Provides the error taxonomy shared by the sifting engine, key wrapper,
 * lifecycle manager and pairing manager, with error codes, user-friendly
 * messages and suggested remediation.
 */

use std::collections::HashMap;
use thiserror::Error;

/// Error type for all KME operations
#[derive(Debug, Error)]
pub enum KmeError {
    #[error("Invalid parameter: {parameter} - {expected} - got {actual}")]
    InvalidParameter {
        parameter: String,
        expected: String,
        actual: String,
        error_code: u32,
    },

    #[error("Capacity exceeded: {resource} - limit {limit}, requested {requested}")]
    CapacityExceeded {
        resource: String,
        limit: u64,
        requested: u64,
        error_code: u32,
    },

    #[error("No pairing for SAE {sae_id}")]
    NoPairing { sae_id: String, error_code: u32 },

    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
        error_code: u32,
    },

    #[error("Unauthorized: {operation} denied for {requester}")]
    Unauthorized {
        operation: String,
        requester: String,
        error_code: u32,
    },

    #[error("SAE {sae_id} is already paired with {partner_id}")]
    AlreadyPaired {
        sae_id: String,
        partner_id: String,
        error_code: u32,
    },

    #[error("Encryption failed: {operation} - {cause}")]
    EncryptionError {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Decryption failed: {operation} - {cause}")]
    DecryptionError {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Integrity check failed: {operation} - {cause}")]
    IntegrityError {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Certificate missing for KME {kme_id}")]
    CertificateMissing { kme_id: String, error_code: u32 },

    #[error("Untrusted peer: {source_kme} -> {target_kme}")]
    UntrustedPeer {
        source_kme: String,
        target_kme: String,
        error_code: u32,
    },

    #[error("Random number generation failed: {cause}")]
    RandomGenerationError { cause: String, error_code: u32 },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {field} - {cause}")]
    ConfigError {
        field: String,
        cause: String,
        error_code: u32,
    },

    #[error("Relay to {peer} failed: {cause}")]
    RelayError {
        peer: String,
        cause: String,
        error_code: u32,
    },

    #[error("IO error: {0}")]
    IoError(String),
}

/// Error code constants for different error categories
pub mod error_codes {
    // Request validation errors: 1000-1999
    pub const INVALID_PARAMETER: u32 = 1001;
    pub const KEY_SIZE_NOT_BYTE_ALIGNED: u32 = 1002;
    pub const KEY_SIZE_OUT_OF_RANGE: u32 = 1003;
    pub const EMPTY_TARGET_SET: u32 = 1004;
    pub const NOT_A_MASTER: u32 = 1005;

    // Capacity errors: 2000-2999
    pub const STORED_KEY_LIMIT: u32 = 2001;
    pub const KEYS_PER_REQUEST_LIMIT: u32 = 2002;
    pub const ADDITIONAL_TARGET_LIMIT: u32 = 2003;

    // Lookup errors: 3000-3999
    pub const NO_PAIRING: u32 = 3001;
    pub const KME_NOT_FOUND: u32 = 3002;
    pub const SAE_NOT_FOUND: u32 = 3003;
    pub const KEY_NOT_FOUND: u32 = 3004;
    pub const NO_KEYS_FOR_CONSUMER: u32 = 3005;

    // Authorization errors: 4000-4999
    pub const UNAUTHORIZED_KEY_ACCESS: u32 = 4001;
    pub const ALREADY_PAIRED: u32 = 4002;

    // Wrapping errors: 5000-5999
    pub const WRAPPING_KEY_MALFORMED: u32 = 5001;
    pub const IV_MALFORMED: u32 = 5002;
    pub const CIPHERTEXT_DECODING_FAILED: u32 = 5003;
    pub const AUTHENTICATION_FAILED: u32 = 5004;
    pub const BIT_ENCODING_INVALID: u32 = 5005;
    pub const ENCRYPTION_FAILED: u32 = 5006;
    pub const VAULT_KEY_DERIVATION_FAILED: u32 = 5007;

    // Federation errors: 6000-6999
    pub const CERTIFICATE_MISSING: u32 = 6001;
    pub const CERTIFICATE_MISMATCH: u32 = 6002;
    pub const RELAY_FAILED: u32 = 6003;

    // Environment errors: 7000-7999
    pub const RNG_FAILED: u32 = 7001;
    pub const CONFIG_INVALID: u32 = 7002;
}

impl KmeError {
    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            KmeError::InvalidParameter { error_code, .. } => *error_code,
            KmeError::CapacityExceeded { error_code, .. } => *error_code,
            KmeError::NoPairing { error_code, .. } => *error_code,
            KmeError::NotFound { error_code, .. } => *error_code,
            KmeError::Unauthorized { error_code, .. } => *error_code,
            KmeError::AlreadyPaired { error_code, .. } => *error_code,
            KmeError::EncryptionError { error_code, .. } => *error_code,
            KmeError::DecryptionError { error_code, .. } => *error_code,
            KmeError::IntegrityError { error_code, .. } => *error_code,
            KmeError::CertificateMissing { error_code, .. } => *error_code,
            KmeError::UntrustedPeer { error_code, .. } => *error_code,
            KmeError::RandomGenerationError { error_code, .. } => *error_code,
            KmeError::ConfigError { error_code, .. } => *error_code,
            KmeError::RelayError { error_code, .. } => *error_code,
            KmeError::SerializationError(_) => 9001,
            KmeError::IoError(_) => 9002,
        }
    }

    /// Get the error category/type as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            KmeError::InvalidParameter { .. } => "InvalidParameter",
            KmeError::CapacityExceeded { .. } => "CapacityExceeded",
            KmeError::NoPairing { .. } => "NoPairing",
            KmeError::NotFound { .. } => "NotFound",
            KmeError::Unauthorized { .. } => "Unauthorized",
            KmeError::AlreadyPaired { .. } => "AlreadyPaired",
            KmeError::EncryptionError { .. } => "EncryptionError",
            KmeError::DecryptionError { .. } => "DecryptionError",
            KmeError::IntegrityError { .. } => "IntegrityError",
            KmeError::CertificateMissing { .. } => "CertificateMissing",
            KmeError::UntrustedPeer { .. } => "UntrustedPeer",
            KmeError::RandomGenerationError { .. } => "RandomGenerationError",
            KmeError::SerializationError(_) => "SerializationError",
            KmeError::ConfigError { .. } => "ConfigError",
            KmeError::RelayError { .. } => "RelayError",
            KmeError::IoError(_) => "IoError",
        }
    }

    /// Whether the transport layer should report this error as "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(self, KmeError::NotFound { .. } | KmeError::NoPairing { .. })
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            KmeError::InvalidParameter {
                parameter,
                expected,
                ..
            } => format!(
                "Invalid parameter '{}'. Expected {}.",
                parameter, expected
            ),
            KmeError::CapacityExceeded { resource, limit, .. } => format!(
                "KME limit '{}' ({}) would be exceeded. No keys were generated.",
                resource, limit
            ),
            KmeError::NoPairing { .. } => {
                "The SAE is not paired with a master SAE.".to_string()
            }
            KmeError::NotFound { entity, .. } => format!("{} not found.", entity),
            // The message must not reveal whether the key exists.
            KmeError::Unauthorized { .. } => {
                "The requesting SAE is not allowed to perform this operation.".to_string()
            }
            KmeError::AlreadyPaired { .. } => {
                "The SAE is already paired. Unpair it before pairing again.".to_string()
            }
            KmeError::EncryptionError { operation, .. } => format!(
                "Key material could not be encrypted during '{}'. No keys were stored.",
                operation
            ),
            KmeError::DecryptionError { operation, .. } => format!(
                "Key material could not be decrypted during '{}'.",
                operation
            ),
            KmeError::IntegrityError { operation, .. } => format!(
                "Stored key material failed its integrity check during '{}'. The record may be corrupted or tampered with.",
                operation
            ),
            KmeError::CertificateMissing { .. } => {
                "Federation requires both KMEs to hold a certificate.".to_string()
            }
            KmeError::UntrustedPeer { .. } => {
                "The peer KME is not trusted for key relay.".to_string()
            }
            KmeError::RandomGenerationError { .. } => {
                "Random number generation failed. Keys cannot be produced safely.".to_string()
            }
            KmeError::SerializationError(_) => {
                "Data serialization failed. Data format may be corrupted.".to_string()
            }
            KmeError::ConfigError { field, .. } => {
                format!("Configuration value '{}' is invalid.", field)
            }
            KmeError::RelayError { peer, .. } => {
                format!("Key batch could not be relayed to peer KME '{}'.", peer)
            }
            KmeError::IoError(_) => {
                "Input/output operation failed. Check file permissions and paths.".to_string()
            }
        }
    }

    /// Get technical details for debugging
    pub fn technical_details(&self) -> HashMap<String, String> {
        let mut details = HashMap::new();

        details.insert("error_code".to_string(), self.error_code().to_string());
        details.insert("error_type".to_string(), self.error_type().to_string());
        details.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());

        match self {
            KmeError::InvalidParameter {
                parameter,
                expected,
                actual,
                ..
            } => {
                details.insert("parameter".to_string(), parameter.clone());
                details.insert("expected".to_string(), expected.clone());
                details.insert("actual".to_string(), actual.clone());
            }
            KmeError::CapacityExceeded {
                resource,
                limit,
                requested,
                ..
            } => {
                details.insert("resource".to_string(), resource.clone());
                details.insert("limit".to_string(), limit.to_string());
                details.insert("requested".to_string(), requested.to_string());
            }
            KmeError::EncryptionError {
                operation, cause, ..
            }
            | KmeError::DecryptionError {
                operation, cause, ..
            }
            | KmeError::IntegrityError {
                operation, cause, ..
            } => {
                details.insert("operation".to_string(), operation.clone());
                details.insert("cause".to_string(), cause.clone());
            }
            KmeError::Unauthorized { operation, .. } => {
                details.insert("operation".to_string(), operation.clone());
            }
            _ => {
                details.insert("details".to_string(), self.to_string());
            }
        }

        details
    }

    /// Get suggested remediation steps
    pub fn suggested_remediation(&self) -> Option<String> {
        match self {
            KmeError::InvalidParameter { error_code, .. } => match *error_code {
                error_codes::KEY_SIZE_NOT_BYTE_ALIGNED => {
                    Some("Request a key size that is a multiple of 8 bits.".to_string())
                }
                error_codes::KEY_SIZE_OUT_OF_RANGE => Some(
                    "Query the status operation for min_key_size and max_key_size.".to_string(),
                ),
                _ => Some("Check the request parameters.".to_string()),
            },
            KmeError::CapacityExceeded { .. } => Some(
                "Request fewer keys or wait for stored keys to be consumed and retired."
                    .to_string(),
            ),
            KmeError::NoPairing { .. } => Some(
                "Generate keys from a master SAE first to establish the pairing.".to_string(),
            ),
            KmeError::AlreadyPaired { .. } => {
                Some("Call unpair on the SAE before pairing it again.".to_string())
            }
            KmeError::IntegrityError { .. } => Some(
                "Treat the record as compromised and regenerate the key.".to_string(),
            ),
            KmeError::CertificateMissing { .. } | KmeError::UntrustedPeer { .. } => Some(
                "Install matching certificates on both KMEs and re-establish the connection."
                    .to_string(),
            ),
            KmeError::RandomGenerationError { .. } => Some(
                "Check system entropy sources. Consider using hardware RNG if available."
                    .to_string(),
            ),
            KmeError::ConfigError { .. } => {
                Some("Fix the configuration file and restart the KME.".to_string())
            }
            _ => None,
        }
    }
}

/// Convenience constructors for common error types
impl KmeError {
    pub fn invalid_parameter(parameter: &str, expected: &str, actual: &str) -> Self {
        Self::invalid_parameter_with_code(
            parameter,
            expected,
            actual,
            error_codes::INVALID_PARAMETER,
        )
    }

    pub fn invalid_parameter_with_code(
        parameter: &str,
        expected: &str,
        actual: &str,
        error_code: u32,
    ) -> Self {
        KmeError::InvalidParameter {
            parameter: parameter.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            error_code,
        }
    }

    pub fn capacity_exceeded(resource: &str, limit: u64, requested: u64, error_code: u32) -> Self {
        KmeError::CapacityExceeded {
            resource: resource.to_string(),
            limit,
            requested,
            error_code,
        }
    }

    pub fn not_found(entity: &str, id: &str, error_code: u32) -> Self {
        KmeError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
            error_code,
        }
    }

    pub fn no_pairing(sae_id: &str) -> Self {
        KmeError::NoPairing {
            sae_id: sae_id.to_string(),
            error_code: error_codes::NO_PAIRING,
        }
    }

    pub fn unauthorized(operation: &str, requester: &str) -> Self {
        KmeError::Unauthorized {
            operation: operation.to_string(),
            requester: requester.to_string(),
            error_code: error_codes::UNAUTHORIZED_KEY_ACCESS,
        }
    }

    pub fn encryption_error(operation: &str, cause: &str, error_code: u32) -> Self {
        KmeError::EncryptionError {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn decryption_error(operation: &str, cause: &str, error_code: u32) -> Self {
        KmeError::DecryptionError {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn integrity_error(operation: &str, cause: &str, error_code: u32) -> Self {
        KmeError::IntegrityError {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn certificate_missing(kme_id: &str) -> Self {
        KmeError::CertificateMissing {
            kme_id: kme_id.to_string(),
            error_code: error_codes::CERTIFICATE_MISSING,
        }
    }

    pub fn config_error(field: &str, cause: &str) -> Self {
        KmeError::ConfigError {
            field: field.to_string(),
            cause: cause.to_string(),
            error_code: error_codes::CONFIG_INVALID,
        }
    }

    pub fn already_paired(sae_id: &str, partner_id: &str) -> Self {
        KmeError::AlreadyPaired {
            sae_id: sae_id.to_string(),
            partner_id: partner_id.to_string(),
            error_code: error_codes::ALREADY_PAIRED,
        }
    }

    pub fn relay_error(peer: &str, cause: &str) -> Self {
        KmeError::RelayError {
            peer: peer.to_string(),
            cause: cause.to_string(),
            error_code: error_codes::RELAY_FAILED,
        }
    }
}

// From implementations for automatic error conversion
impl From<std::io::Error> for KmeError {
    fn from(err: std::io::Error) -> Self {
        KmeError::IoError(format!("IO operation failed: {}", err))
    }
}

impl From<serde_json::Error> for KmeError {
    fn from(err: serde_json::Error) -> Self {
        KmeError::SerializationError(err.to_string())
    }
}

/// Result type alias for KME operations
pub type KmeResult<T> = Result<T, KmeError>;
