//! Identifier generation for provider requests
//!
//! The provider rejects identifiers containing anything other than ASCII
//! letters and digits, so every generated id is drawn from `[A-Za-z0-9]`.

use crate::types::PayeeId;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of generated search-request identifiers
pub const REQUEST_ID_LEN: usize = 24;

/// Generate a random alphanumeric search-request identifier
pub fn generate_request_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LEN)
        .map(char::from)
        .collect()
}

/// True when `id` is non-empty and ASCII alphanumeric only
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Reference attached to the item at `position` within one submission
pub fn item_reference(position: usize) -> String {
    format!("R{:05}", position)
}

/// Order-independent digest of a payee-id set (lower-case hex)
pub fn submission_key(payee_ids: &[PayeeId]) -> String {
    let mut ids: Vec<&PayeeId> = payee_ids.iter().collect();
    ids.sort();
    ids.dedup();

    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
