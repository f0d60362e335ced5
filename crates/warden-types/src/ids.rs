use rand::RngCore;
use ulid::Ulid;
use uuid::Uuid;

/// Trace IDs are ULIDs: 26 chars, Crockford base32, time-ordered so that
/// lexicographic order equals insertion-time order.
pub fn new_trace_id() -> String {
    Ulid::new().to_string()
}

/// Session IDs: `ses_` prefix plus a random 96-bit suffix.
pub fn new_session_id() -> String {
    let mut suffix = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("ses_{}", hex::encode(suffix))
}

pub fn new_approval_id() -> String {
    format!("apr_{}", Uuid::new_v4().simple())
}

pub fn new_violation_id() -> String {
    format!("vio_{}", Uuid::new_v4().simple())
}
