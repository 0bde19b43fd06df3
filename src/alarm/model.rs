use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Display string shown before the first successful read.
pub const DEFAULT_TIME_DISPLAY: &str = "00:00";

/// Canonical remote alarm state, serialized as `{ "time": <epoch s>, "active": <bool> }`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AlarmConfig {
    #[serde(rename = "time")]
    pub trigger_epoch_seconds: u64,
    pub active: bool,
}

impl AlarmConfig {
    /// Editing the time always re-arms the alarm.
    pub fn armed_at(trigger_epoch_seconds: u64) -> Self {
        Self {
            trigger_epoch_seconds,
            active: true,
        }
    }

    pub fn toggled(self) -> Self {
        Self {
            active: !self.active,
            ..self
        }
    }
}

/// Acknowledgment body returned by the write endpoint. Extra fields are ignored.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
pub struct WriteAck {
    pub success: bool,
}

/// Fractional seconds are accepted but dropped; triggers are whole epoch seconds.
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime> {
    let trimmed = input.trim();
    let parsed = NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .with_context(|| format!("invalid time of day '{input}', expected HH:MM or HH:MM:SS"))?;
    Ok(parsed.with_nanosecond(0).unwrap_or(parsed))
}

/// Formats an epoch instant as 24-hour `HH:MM:SS` in `timezone`.
pub fn format_time_of_day<Tz>(epoch_seconds: u64, timezone: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let seconds = i64::try_from(epoch_seconds).ok()?;
    let instant = timezone.timestamp_opt(seconds, 0).single()?;
    Some(instant.format("%H:%M:%S").to_string())
}

/// Loads the backend's persisted alarm. A missing or unreadable file yields the
/// default alarm, and fields other than `time`/`active` are dropped.
pub fn load_stored_alarm(path: &Path) -> AlarmConfig {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return AlarmConfig::default(),
        Err(err) => {
            log::warn!("unable to read alarm store {}: {err}", path.display());
            return AlarmConfig::default();
        }
    };

    match serde_json::from_str::<StoredAlarmFile>(&content) {
        Ok(raw) => AlarmConfig {
            trigger_epoch_seconds: raw.time,
            active: raw.active,
        },
        Err(err) => {
            log::warn!(
                "alarm store {} is not valid JSON (line {}, column {}), using defaults",
                path.display(),
                err.line(),
                err.column()
            );
            AlarmConfig::default()
        }
    }
}

pub fn save_stored_alarm(path: &Path, alarm: &AlarmConfig) -> Result<()> {
    let text = serde_json::to_string_pretty(alarm)?;
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("unable to write alarm store {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StoredAlarmFile {
    #[serde(default)]
    time: u64,
    #[serde(default)]
    active: bool,
}
