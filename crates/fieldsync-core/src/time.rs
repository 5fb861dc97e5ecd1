use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub type EpochMs = i64;

pub fn now_ms() -> EpochMs {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as i64
}

/// Creation stamp that never goes backwards relative to `last`, even when the
/// wall clock does. Keeps `created_at` ordering strict.
pub fn next_created_at(now: EpochMs, last: Option<EpochMs>) -> EpochMs {
    match last {
        Some(last) if last >= now => last + 1,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_at_is_strictly_increasing() {
        assert_eq!(next_created_at(100, None), 100);
        assert_eq!(next_created_at(100, Some(50)), 100);
        assert_eq!(next_created_at(100, Some(100)), 101);
        // clock stepped back
        assert_eq!(next_created_at(90, Some(100)), 101);
    }
}
