//! Content fingerprinting for change detection.
//!
//! The fingerprint must be stable across runs and platforms: it is the only
//! signal used to decide whether a stored record changed.

use md5::{Digest, Md5};

use crate::models::AddressRaw;

/// Fingerprint the normalized (name, street, city, state, zip) tuple.
///
/// Fields are lower-cased and trimmed, then joined with `|`, which cannot
/// appear in a trimmed field. Returns the hex form of a 128-bit digest.
pub fn fingerprint(name: &str, addr: &AddressRaw) -> String {
    let key = [
        name,
        addr.street.as_str(),
        addr.city.as_str(),
        addr.state.as_str(),
        addr.zip.as_str(),
    ]
    .map(|f| f.to_lowercase().trim().to_string())
    .join("|");
    digest_hex(&key)
}

/// Hash an arbitrary string after the same lower-case/trim normalization.
/// Used to derive stable document ids from canonical links.
pub fn hash_string(input: &str) -> String {
    digest_hex(input.to_lowercase().trim())
}

fn digest_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
