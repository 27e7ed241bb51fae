/*!
 * Pairing and federation manager
 *
 * Owns the master/slave SAE links and the KME-to-KME connections. Pairing
 * is stored as identifier-to-identifier links in the store, mirrored on both
 * SAE records. Federation covers the trust check between two KMEs and the
 * relay of a committed batch to the peer KME.
 */

mod federation;
mod manager;

pub use federation::*;
pub use manager::*;
