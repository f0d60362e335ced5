use sha2::{Digest, Sha256};

/// Bodies are truncated to this many bytes before hashing and persistence.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const SEPARATOR: u8 = 0x7C; // '|'

/// Hash of one trace:
/// `SHA-256(id | session_id | action_type | request_body | response_body | prev_hash)`
/// with `|` the literal byte 0x7C. Inputs must already be truncated.
pub fn compute_trace_hash(
    id: &str,
    session_id: &str,
    action_type: &str,
    request_body: &str,
    response_body: &str,
    prev_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update([SEPARATOR]);
    hasher.update(session_id.as_bytes());
    hasher.update([SEPARATOR]);
    hasher.update(action_type.as_bytes());
    hasher.update([SEPARATOR]);
    hasher.update(request_body.as_bytes());
    hasher.update([SEPARATOR]);
    hasher.update(response_body.as_bytes());
    hasher.update([SEPARATOR]);
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Seed hash for the first trace of a session: `SHA-256(session_id)`.
pub fn session_seed(session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncate a body to [`MAX_BODY_BYTES`], backing off to a char boundary.
pub fn truncate_body(body: &str) -> &str {
    if body.len() <= MAX_BODY_BYTES {
        return body;
    }
    let mut end = MAX_BODY_BYTES;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
