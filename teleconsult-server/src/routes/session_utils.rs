use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};

const SESSION_TTL_DURATION_SEC: u64 = 60;
pub const RETRY_AFTER_INTERVAL_SEC: u32 = 3;

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

pub fn now_sec() -> u64 {
    since_epoch().as_secs()
}

pub fn now_nanos() -> u128 {
    since_epoch().as_nanos()
}

pub fn ttl_sec(now_sec: u64) -> u64 {
    now_sec + SESSION_TTL_DURATION_SEC
}

pub fn decode_appointment_id(encoded: &str) -> Result<String> {
    let decoded = urlencoding::decode(encoded)?;
    if decoded.trim().is_empty() {
        bail!("empty appointment id");
    }
    Ok(decoded.into_owned())
}
