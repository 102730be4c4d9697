use chrono::{NaiveDateTime, TimeDelta};

use crate::error::SimError;

use super::types::SimTime;

/// Maps integer simulation ticks to wall-clock timestamps and back.
///
/// Tick `t` corresponds to `start + t * resolution`. Conversion in the
/// other direction floors to the tick that contains the timestamp, so the
/// two directions are exact inverses for tick-aligned times.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use vpp_sil::sim::clock::Clock;
///
/// let start = NaiveDate::from_ymd_opt(2020, 1, 1)
///     .unwrap()
///     .and_hms_opt(0, 0, 0)
///     .unwrap();
/// let clock = Clock::new(start, 60).unwrap();
///
/// let dt = clock.to_datetime(5).unwrap();
/// assert_eq!(dt.to_string(), "2020-01-01 00:05:00");
/// assert_eq!(clock.to_simtime(dt).unwrap(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    /// Wall-clock time of tick 0.
    start: NaiveDateTime,
    /// Duration of one tick in seconds.
    resolution_secs: u64,
}

impl Clock {
    /// Creates a clock starting at `start` with ticks of `resolution_secs`.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidParameter` if `resolution_secs` is zero or
    /// does not fit a signed duration.
    pub fn new(start: NaiveDateTime, resolution_secs: u64) -> Result<Self, SimError> {
        if resolution_secs == 0 || i64::try_from(resolution_secs).is_err() {
            return Err(SimError::InvalidParameter {
                name: "resolution",
                reason: format!("must be between 1 and {} seconds", i64::MAX),
            });
        }
        Ok(Self {
            start,
            resolution_secs,
        })
    }

    /// Wall-clock time of tick 0.
    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Tick duration in seconds.
    pub fn resolution_secs(&self) -> u64 {
        self.resolution_secs
    }

    /// Converts a tick to its wall-clock timestamp.
    ///
    /// # Errors
    ///
    /// Returns `SimError::TimeOverflow` if the timestamp is not representable.
    pub fn to_datetime(&self, tick: SimTime) -> Result<NaiveDateTime, SimError> {
        tick.checked_mul(self.resolution_secs)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| self.start.checked_add_signed(delta))
            .ok_or(SimError::TimeOverflow(tick))
    }

    /// Converts a wall-clock timestamp to the tick containing it.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidTime` if `dt` is earlier than the start.
    pub fn to_simtime(&self, dt: NaiveDateTime) -> Result<SimTime, SimError> {
        if dt < self.start {
            return Err(SimError::InvalidTime {
                time: dt,
                start: self.start,
            });
        }
        // Positive durations truncate toward zero, which is the floor.
        let elapsed = dt.signed_duration_since(self.start).num_seconds();
        let elapsed = u64::try_from(elapsed).map_err(|_| SimError::InvalidTime {
            time: dt,
            start: self.start,
        })?;
        Ok(elapsed / self.resolution_secs)
    }
}
