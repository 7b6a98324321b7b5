//! Time and pause ledger.
//!
//! Derived durations are computed here so every caller agrees on them
//! across pause/resume cycles. Display helpers never fail: missing or
//! unparseable timestamps count as zero elapsed time.

use crate::{Error, PauseTimestamp, Result};
use chrono::{DateTime, Utc};

/// Whole seconds between `t0` and `now`, never negative
pub fn elapsed_since(t0: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    match t0 {
        Some(t0) => (now - t0).num_seconds().max(0),
        None => 0,
    }
}

/// Same as [`elapsed_since`] for RFC 3339 strings coming off the wire
pub fn elapsed_since_rfc3339(t0: Option<&str>, now: DateTime<Utc>) -> i64 {
    let parsed = t0
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    elapsed_since(parsed, now)
}

/// Close a pause interval
pub fn close_pause(paused_at: DateTime<Utc>, resumed_at: DateTime<Utc>) -> PauseTimestamp {
    PauseTimestamp {
        paused_at,
        resumed_at,
        duration_seconds: elapsed_since(Some(paused_at), resumed_at),
    }
}

/// Sum of all closed pause intervals
pub fn total_paused(pauses: &[PauseTimestamp]) -> i64 {
    pauses.iter().map(|p| p.duration_seconds).sum()
}

/// `total - paused`, failing if the ledger is inconsistent
pub fn checked_active_duration(total_seconds: i64, paused_seconds: i64) -> Result<i64> {
    let active = total_seconds - paused_seconds;
    if active < 0 {
        return Err(Error::Consistency(format!(
            "active duration is negative: total {}s, paused {}s",
            total_seconds, paused_seconds
        )));
    }
    Ok(active)
}

/// `total - paused`, clamped at zero.
///
/// A negative result means the ledger is broken; debug builds assert,
/// release builds log and clamp so a live workout keeps going.
pub fn active_duration(total_seconds: i64, paused_seconds: i64) -> i64 {
    match checked_active_duration(total_seconds, paused_seconds) {
        Ok(active) => active,
        Err(e) => {
            debug_assert!(false, "{}", e);
            tracing::warn!("{}; clamping to zero", e);
            0
        }
    }
}
