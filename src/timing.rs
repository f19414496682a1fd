//! Wall-clock timing helpers
//!
//! Report timestamps and the report schedule use wall-clock microseconds so
//! that results are meaningful to the application; pipeline scheduling uses
//! the monotonic `Instant` clock and never appears here.

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current wall-clock time in microseconds since the Unix epoch.
#[inline]
pub fn now_micros() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_micros() as u64,
        Err(_) => 0,
    }
}
