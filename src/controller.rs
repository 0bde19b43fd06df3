use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::alarm::model::{
    AlarmConfig, DEFAULT_TIME_DISPLAY, format_time_of_day, parse_time_of_day,
};
use crate::alarm::schedule::{epoch_seconds, next_trigger};
use crate::store_client::{AlarmStore, AlarmStoreClient, StoreEvent};

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum Status {
    #[default]
    Idle,
    Saving,
    Error,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UiState {
    pub config: AlarmConfig,
    pub time_display: String,
    pub status: Status,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            config: AlarmConfig::default(),
            time_display: DEFAULT_TIME_DISPLAY.to_string(),
            status: Status::Idle,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Intent {
    SetTime(String),
    Toggle,
}

/// Owns the alarm state and reconciles user edits with store outcomes.
///
/// Edits are applied optimistically: the new config and `Status::Saving` are
/// visible before the write is issued. Store outcomes arrive as events and are
/// only applied when the owner drains them (`process_pending`,
/// `wait_for_event`, `settle`), in arrival order. A failed write never rolls
/// the config back. Concurrent writes may settle out of order; whichever is
/// processed last decides the status. A read settling while a write is still
/// pending replaces the config but leaves the status at `Saving`.
pub struct AlarmController<Tz: TimeZone = Local> {
    client: AlarmStoreClient,
    events: Receiver<StoreEvent>,
    timezone: Tz,
    state: UiState,
    initialized: bool,
    pending_reads: usize,
    pending_writes: usize,
}

impl AlarmController<Local> {
    pub fn new(store: Arc<dyn AlarmStore>) -> Self {
        Self::with_timezone(store, Local)
    }
}

impl<Tz> AlarmController<Tz>
where
    Tz: TimeZone,
    Tz::Offset: Copy + std::fmt::Display,
{
    pub fn with_timezone(store: Arc<dyn AlarmStore>, timezone: Tz) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            client: AlarmStoreClient::new(store, tx),
            events: rx,
            timezone,
            state: UiState::default(),
            initialized: false,
            pending_reads: 0,
            pending_writes: 0,
        }
    }

    /// Issues the startup read. The default view stays in place until it settles.
    pub fn start(&mut self) {
        log::debug!("fetching alarm configuration");
        self.pending_reads += 1;
        self.client.read_config();
    }

    pub fn snapshot(&self) -> UiState {
        self.state.clone()
    }

    pub fn status(&self) -> Status {
        self.state.status
    }

    pub fn config(&self) -> AlarmConfig {
        self.state.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn in_flight(&self) -> usize {
        self.pending_reads + self.pending_writes
    }

    /// Returns true when the intent produced a new config and a write.
    pub fn dispatch(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::SetTime(input) => self.set_time(&input),
            Intent::Toggle => {
                self.toggle();
                true
            }
        }
    }

    pub fn set_time(&mut self, input: &str) -> bool {
        self.set_time_at(input, Utc::now())
    }

    /// Time edit as of `now`. Unparsable input only updates the display string.
    pub fn set_time_at(&mut self, input: &str, now: DateTime<Utc>) -> bool {
        self.state.time_display = input.to_string();

        let Ok(time_of_day) = parse_time_of_day(input) else {
            log::debug!("ignoring unparsable time of day '{input}'");
            return false;
        };
        let local_now = now.with_timezone(&self.timezone);
        let Some(trigger) = next_trigger(time_of_day, &local_now, &self.timezone)
            .and_then(|instant| epoch_seconds(&instant))
        else {
            log::warn!("no trigger instant for '{input}' after {now}");
            return false;
        };

        log::info!("alarm time set to {input} (epoch {trigger})");
        self.apply_edit(AlarmConfig::armed_at(trigger));
        true
    }

    pub fn toggle(&mut self) {
        let next = self.state.config.toggled();
        log::info!("alarm {}", if next.active { "armed" } else { "disarmed" });
        self.apply_edit(next);
    }

    fn apply_edit(&mut self, config: AlarmConfig) {
        self.state.config = config;
        self.state.status = Status::Saving;
        self.pending_writes += 1;
        self.client.write_config(config);
    }

    pub fn handle_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Fetched(outcome) => {
                self.pending_reads = self.pending_reads.saturating_sub(1);
                self.initialized = true;
                match outcome {
                    Ok(config) => {
                        log::debug!("fetched alarm {config:?}");
                        self.state.config = config;
                        self.state.time_display =
                            format_time_of_day(config.trigger_epoch_seconds, &self.timezone)
                                .unwrap_or_else(|| DEFAULT_TIME_DISPLAY.to_string());
                        self.state.status = if self.pending_writes > 0 {
                            Status::Saving
                        } else {
                            Status::Idle
                        };
                    }
                    Err(err) => {
                        log::warn!("could not load alarm: {err}");
                        self.state.status = Status::Error;
                    }
                }
            }
            StoreEvent::Saved { config, outcome } => {
                self.pending_writes = self.pending_writes.saturating_sub(1);
                match outcome {
                    Ok(_) => {
                        log::debug!("saved alarm {config:?}");
                        self.state.status = Status::Idle;
                    }
                    Err(err) => {
                        log::warn!("could not save alarm: {err}");
                        self.state.status = Status::Error;
                    }
                }
            }
        }
    }

    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Blocks up to `timeout` for the next outcome. Returns false on timeout.
    pub fn wait_for_event(&mut self, timeout: Duration) -> bool {
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Waits until nothing is in flight or `timeout` passes. Requests still
    /// outstanding at the deadline keep running and the status is left as is.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait_for_event(remaining) {
                return self.in_flight() == 0;
            }
        }
        true
    }
}
