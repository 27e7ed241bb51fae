/*!
 * BB84 sifting engine
 *
 * Simulates Alice's preparation and Bob's measurement over a trusted,
 * lossless, noiseless channel and keeps the positions where both parties
 * chose the same basis.
 */

mod bb84;

pub use bb84::*;
