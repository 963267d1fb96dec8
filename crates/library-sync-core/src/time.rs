//! Timestamp helpers shared by the packet codec and the merge handlers.
//!
//! Every wire timestamp is an integer count of seconds since the Unix epoch.
//! Internally everything is a `DateTime<Utc>`, so comparisons never depend on
//! the local time zone of either device.

use chrono::{DateTime, Utc};

/// Wire value meaning "no time recorded".
pub const UNDEFINED_TIME: i64 = -1;

/// Add-times at or before this many seconds past the epoch are treated as
/// placeholders left by a default-initialized value, not real user actions.
pub const PLACEHOLDER_CUTOFF_SECS: i64 = 24 * 60 * 60;

/// The earliest representable instant. Used wherever a missing time must
/// lose every comparison.
pub const EARLIEST: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// Convert unix seconds to a UTC instant.
///
/// Negative values are undefined on the wire and yield `None`, as do values
/// outside chrono's range.
pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs < 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(secs, 0)
}

/// Like [`from_unix`], but undefined values collapse to [`EARLIEST`].
pub fn from_unix_or_earliest(secs: i64) -> DateTime<Utc> {
    from_unix(secs).unwrap_or(EARLIEST)
}

/// Convert an optional instant to wire seconds, writing [`UNDEFINED_TIME`] for `None`.
pub fn to_unix_or_undefined(time: Option<DateTime<Utc>>) -> i64 {
    time.map(|t| t.timestamp()).unwrap_or(UNDEFINED_TIME)
}

/// Whether `time` is late enough to be a real timestamp rather than a placeholder.
pub fn is_after_placeholder_cutoff(time: DateTime<Utc>) -> bool {
    time.timestamp() > PLACEHOLDER_CUTOFF_SECS
}
