use sha2::{Digest, Sha256};

/// Creates a truncated, salted hash of an identity key for safe logging.
/// Raw root or client keys never appear in logs unless the deployment
/// explicitly enables user identifiers.
pub fn log_safe_key(key: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(key.as_bytes());
    let hash = hasher.finalize();

    hash[..4]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}
