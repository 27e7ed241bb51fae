/*!
 * Key store and lifecycle manager
 *
 * Owns creation of key records and the per-KME stored-key accounting.
 * Requests are validated against the KME policy before any key is sifted,
 * and a batch is committed as one unit under the capacity check.
 */

mod manager;

pub use manager::*;
