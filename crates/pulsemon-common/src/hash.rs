use sha2::{Digest, Sha256};

/// Keyed integrity tag carried in the `HashSHA256` header:
/// `hex(SHA-256(body ‖ key))` over the exact transmitted body bytes.
pub fn body_tag(body: &[u8], key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
