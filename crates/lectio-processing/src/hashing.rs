use sha2::{Digest, Sha256};

/// SHA-256 hex digest of `original_filename + extracted_text`.
///
/// An empty combined input yields an empty string rather than the digest of "".
pub fn content_hash(original_filename: &str, extracted_text: &str) -> String {
    if original_filename.is_empty() && extracted_text.is_empty() {
        tracing::warn!("Hash input is empty, returning empty hash");
        return String::new();
    }

    let mut hasher = Sha256::new();
    hasher.update(original_filename.as_bytes());
    hasher.update(extracted_text.as_bytes());
    hex::encode(hasher.finalize())
}
