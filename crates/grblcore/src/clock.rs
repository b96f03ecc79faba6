//! Millisecond wall-clock helper, grounded on
//! `crates/gcodekit4-communication/src/firmware/connection_watch.rs`, which
//! stamps its heartbeat the same way.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
