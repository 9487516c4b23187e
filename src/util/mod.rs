//! String normalization and content fingerprinting helpers.

mod address;
mod hash;

pub use address::{clean_address, clean_field, clean_link, clean_standardized, needs_cleanup};
pub use hash::{fingerprint, hash_string};
