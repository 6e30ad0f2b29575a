//! Shared key generation for storage backends.

use uuid::Uuid;

/// Generate a storage key for a document upload.
///
/// Produces `documents/{owner_id}/{uuid}_{filename}` where the filename is reduced to
/// ASCII letters, digits, `.`, `-` and `_`. The random prefix keeps repeated uploads of
/// the same filename apart.
pub fn generate_storage_key(owner_id: Uuid, filename: &str) -> String {
    format!(
        "documents/{}/{}_{}",
        owner_id,
        Uuid::new_v4(),
        sanitize_filename(filename)
    )
}

fn sanitize_filename(filename: &str) -> String {
    // drop any client-side directory part
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').replace("..", "_");
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
