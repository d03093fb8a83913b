use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

use crate::types::Trigger;

/// Compute the next UTC fire time for `trigger` strictly *after* `from`.
///
/// Returns `None` only for an impossible wall-clock time (hour > 23 or
/// minute > 59).
pub fn compute_next_run(trigger: &Trigger, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Interval { every_secs } => Some(from + Duration::seconds(*every_secs as i64)),

        Trigger::Daily { hour, minute } => {
            let candidate = Utc
                .with_ymd_and_hms(
                    from.year(),
                    from.month(),
                    from.day(),
                    u32::from(*hour),
                    u32::from(*minute),
                    0,
                )
                .single()?;
            if candidate > from {
                Some(candidate)
            } else {
                Some(candidate + Duration::days(1))
            }
        }
    }
}
