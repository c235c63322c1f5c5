//! Random identifiers for nodes, documents and rows.

use rand::distributions::{Alphanumeric, DistString};

/// Length of generated document and row ids.
pub const DEFAULT_ID_LEN: usize = 16;

/// A random `[0-9A-Za-z]` string of `len` characters.
pub fn random_id(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

/// A random id of [`DEFAULT_ID_LEN`] characters.
pub fn new_id() -> String {
    random_id(DEFAULT_ID_LEN)
}
