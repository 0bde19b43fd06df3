use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveTime, TimeZone};

use crate::alarm::model::AlarmConfig;

/// Next instant at or after `now` whose wall-clock time in `timezone` is
/// `time_of_day`. The horizon is today or tomorrow, never further.
pub fn next_trigger<Tz>(
    time_of_day: NaiveTime,
    now: &DateTime<Tz>,
    timezone: &Tz,
) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let today = now.date_naive();
    if let Some(candidate) = resolve_wall_clock(timezone, today, time_of_day, now)
        && candidate >= *now
    {
        return Some(candidate);
    }

    let tomorrow = today.checked_add_days(Days::new(1))?;
    resolve_wall_clock(timezone, tomorrow, time_of_day, now)
}

fn resolve_wall_clock<Tz>(
    timezone: &Tz,
    date: NaiveDate,
    time_of_day: NaiveTime,
    not_before: &DateTime<Tz>,
) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let naive = date.and_time(time_of_day);
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(first, second) => {
            if first >= *not_before {
                Some(first)
            } else {
                Some(second)
            }
        }
        // Spring-forward gap: the clock skips this time, use the hour after.
        LocalResult::None => timezone
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest(),
    }
}

pub fn epoch_seconds<Tz: TimeZone>(instant: &DateTime<Tz>) -> Option<u64> {
    u64::try_from(instant.timestamp()).ok()
}

/// Seconds from `now` until the alarm fires, or `None` when it is disarmed.
pub fn seconds_until_trigger(config: &AlarmConfig, now_epoch_seconds: i64) -> Option<i64> {
    if !config.active {
        return None;
    }
    let trigger = i64::try_from(config.trigger_epoch_seconds).ok()?;
    Some(trigger.saturating_sub(now_epoch_seconds))
}

/// True when an armed alarm fires within `[now, now + window)`.
pub fn is_due_within(
    config: &AlarmConfig,
    now_epoch_seconds: i64,
    window: chrono::Duration,
) -> bool {
    match seconds_until_trigger(config, now_epoch_seconds) {
        Some(remaining) => remaining >= 0 && remaining < window.num_seconds(),
        None => false,
    }
}
