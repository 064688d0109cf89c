//! Utility functions for identifiers and hashing

use bech32::Bech32m;
use uuid7::uuid7;

pub const USER_HRP: &str = "user_";
pub const COURSE_HRP: &str = "course_";
pub const ENROLLMENT_HRP: &str = "enrol_";
pub const RECORD_HRP: &str = "rec_";

// construct a unique, time-ordered id then encode using bech32
pub fn new_id(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Digest identifying a caller-supplied dedup key within one enrollment.
pub fn dedup_digest(enrollment_id: &str, dedup_key: &str) -> String {
    sha256::digest(format!("{enrollment_id}:{dedup_key}"))
}
