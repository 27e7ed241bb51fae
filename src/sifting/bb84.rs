use rand::{CryptoRng, Rng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{error_codes, KmeError, KmeResult};

/// Polarization basis used to prepare or measure a qubit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    /// Z basis
    Rectilinear,
    /// X basis
    Diagonal,
}

impl Basis {
    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        if rng.gen::<bool>() {
            Basis::Diagonal
        } else {
            Basis::Rectilinear
        }
    }
}

/// A qubit as prepared by Alice
#[derive(Debug, Clone, Copy)]
struct Qubit {
    value: u8,
    basis: Basis,
}

impl Qubit {
    /// Measure in `basis`. A matching basis reproduces the prepared value;
    /// a mismatched one collapses to a uniformly random outcome.
    fn measure<R: RngCore + CryptoRng>(self, basis: Basis, rng: &mut R) -> u8 {
        if basis == self.basis {
            self.value
        } else {
            rng.gen::<bool>() as u8
        }
    }
}

/// Key bits surviving basis reconciliation, in original index order
///
/// Each element is 0 or 1. The length varies from run to run and may be
/// zero for very short exchanges.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SiftedKey {
    bits: Vec<u8>,
}

impl std::fmt::Debug for SiftedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiftedKey")
            .field("len", &self.bits.len())
            .field("bits", &"[REDACTED]")
            .finish()
    }
}

impl SiftedKey {
    /// Build a key from 0/1 values; any other value is rejected
    pub fn from_bits(bits: Vec<u8>) -> KmeResult<Self> {
        if let Some(bad) = bits.iter().find(|&&b| b > 1) {
            return Err(KmeError::invalid_parameter(
                "bits",
                "values 0 or 1",
                &bad.to_string(),
            ));
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Render as a string of '0'/'1' characters
    pub fn to_bit_string(&self) -> String {
        self.bits.iter().map(|&b| if b == 1 { '1' } else { '0' }).collect()
    }
}

/// Full record of one simulated exchange
#[derive(Debug, Clone)]
pub struct Bb84Exchange {
    pub alice_bits: Vec<u8>,
    pub alice_bases: Vec<Basis>,
    pub bob_bases: Vec<Basis>,
    pub bob_results: Vec<u8>,
}

impl Bb84Exchange {
    /// Simulate one exchange of `num_bits` qubits
    pub fn simulate<R: RngCore + CryptoRng>(rng: &mut R, num_bits: usize) -> Self {
        let alice_bits: Vec<u8> = (0..num_bits).map(|_| rng.gen::<bool>() as u8).collect();
        let alice_bases: Vec<Basis> = (0..num_bits).map(|_| Basis::random(rng)).collect();
        let bob_bases: Vec<Basis> = (0..num_bits).map(|_| Basis::random(rng)).collect();

        let bob_results = alice_bits
            .iter()
            .zip(&alice_bases)
            .zip(&bob_bases)
            .map(|((&value, &basis), &bob_basis)| Qubit { value, basis }.measure(bob_basis, rng))
            .collect();

        Self {
            alice_bits,
            alice_bases,
            bob_bases,
            bob_results,
        }
    }

    /// Positions where Alice and Bob used the same basis
    pub fn matching_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.alice_bases
            .iter()
            .zip(&self.bob_bases)
            .enumerate()
            .filter(|(_, (a, b))| a == b)
            .map(|(i, _)| i)
    }

    /// Alice's bits at matching positions
    pub fn sift(&self) -> SiftedKey {
        SiftedKey {
            bits: self.matching_positions().map(|i| self.alice_bits[i]).collect(),
        }
    }

    /// Bob's measured bits at matching positions
    pub fn sift_bob(&self) -> SiftedKey {
        SiftedKey {
            bits: self.matching_positions().map(|i| self.bob_results[i]).collect(),
        }
    }
}

/// Check that `bits_per_key` is a positive multiple of 8
pub fn validate_bits_per_key(bits_per_key: usize) -> KmeResult<()> {
    if bits_per_key == 0 || bits_per_key % 8 != 0 {
        return Err(KmeError::invalid_parameter_with_code(
            "bits_per_key",
            "a positive multiple of 8",
            &bits_per_key.to_string(),
            error_codes::KEY_SIZE_NOT_BYTE_ALIGNED,
        ));
    }
    Ok(())
}

/// Run `num_keys` independent exchanges of `bits_per_key` qubits each
///
/// # Errors
///
/// `InvalidParameter` if `bits_per_key` is not a positive multiple of 8;
/// nothing is generated in that case.
pub fn sift<R: RngCore + CryptoRng>(
    rng: &mut R,
    num_keys: usize,
    bits_per_key: usize,
) -> KmeResult<Vec<SiftedKey>> {
    validate_bits_per_key(bits_per_key)?;

    let keys: Vec<SiftedKey> = (0..num_keys)
        .map(|_| Bb84Exchange::simulate(rng, bits_per_key).sift())
        .collect();

    if !keys.is_empty() {
        let total: usize = keys.iter().map(SiftedKey::len).sum();
        log::debug!(
            "Sifted {} keys from {} qubits each, mean length {:.1}",
            keys.len(),
            bits_per_key,
            total as f64 / keys.len() as f64
        );
    }

    Ok(keys)
}
