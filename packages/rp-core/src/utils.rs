//! Small standalone helpers with no natural home in a single module.
//!
//! Grounded on the teacher's `utils.rs` (`now_millis`).

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds. Falls back to `0` if the system clock
/// is somehow set before the epoch, rather than panicking.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_nonzero() {
        assert!(now_millis() > 0);
    }
}
