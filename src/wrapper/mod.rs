/*!
 * Key wrapping for at-rest storage of sifted keys
 *
 * Sifted bits are serialized with a versioned packed encoding and sealed
 * with AES-128-GCM under a per-batch wrapping key. Wrapping keys never hit
 * the store in the clear: the vault seals them with AES-256-GCM under a key
 * derived from the KME master secret.
 */

mod encoding;
mod vault;
mod wrapper;

pub use encoding::*;
pub use vault::*;
pub use wrapper::*;

#[cfg(test)]
mod tests;
