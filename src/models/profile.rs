//! Time-indexed power profiles consumed by the generator model.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Timelike};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Deserialize;

use crate::error::SimError;

/// Timestamp formats accepted in profile CSV files.
const TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// A source of instantaneous power values indexed by wall-clock time.
pub trait PowerProfile: Send + Sync {
    /// Power at `dt`.
    fn power_at(&self, dt: NaiveDateTime) -> f64;

    /// First instant after `dt` at which the value may change, `None` if
    /// the value never changes again.
    fn next_update(&self, dt: NaiveDateTime) -> Option<NaiveDateTime>;
}

/// Fixed power value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantProfile {
    value: f64,
}

impl ConstantProfile {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl PowerProfile for ConstantProfile {
    fn power_at(&self, _dt: NaiveDateTime) -> f64 {
        self.value
    }

    fn next_update(&self, _dt: NaiveDateTime) -> Option<NaiveDateTime> {
        None
    }
}

/// Step-wise series with zero-order hold between samples.
///
/// Before the first sample the first value applies.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use vpp_sil::models::profile::{PowerProfile, TimeSeriesProfile};
///
/// let at = |h| NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(h, 0, 0).unwrap();
/// let profile = TimeSeriesProfile::new([(at(1), 2.0), (at(3), 5.0)]).unwrap();
///
/// assert_eq!(profile.power_at(at(0)), 2.0);
/// assert_eq!(profile.power_at(at(2)), 2.0);
/// assert_eq!(profile.power_at(at(4)), 5.0);
/// assert_eq!(profile.next_update(at(1)), Some(at(3)));
/// assert_eq!(profile.next_update(at(3)), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesProfile {
    samples: BTreeMap<NaiveDateTime, f64>,
}

#[derive(Debug, Deserialize)]
struct SampleRow {
    time: String,
    value: f64,
}

impl TimeSeriesProfile {
    /// Builds a profile from `(time, value)` samples.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidProfile` if there are no samples or a value
    /// is not finite.
    pub fn new(samples: impl IntoIterator<Item = (NaiveDateTime, f64)>) -> Result<Self, SimError> {
        let samples: BTreeMap<_, _> = samples.into_iter().collect();
        if samples.is_empty() {
            return Err(SimError::InvalidProfile("series has no samples".to_string()));
        }
        if let Some((time, value)) = samples.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SimError::InvalidProfile(format!(
                "non-finite value {value} at {time}"
            )));
        }
        Ok(Self { samples })
    }

    /// Loads a profile from CSV with a `time,value` header.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Csv` for malformed rows and
    /// `SimError::InvalidProfile` for unparseable timestamps.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, SimError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut samples = Vec::new();
        for row in rdr.deserialize() {
            let row: SampleRow = row?;
            samples.push((parse_time(&row.time)?, row.value));
        }
        Self::new(samples)
    }

    /// Loads a profile from a CSV file.
    ///
    /// # Errors
    ///
    /// See [`TimeSeriesProfile::from_csv_reader`]; also fails if the file
    /// cannot be opened.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn parse_time(raw: &str) -> Result<NaiveDateTime, SimError> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| SimError::InvalidProfile(format!("unrecognized timestamp \"{raw}\"")))
}

impl PowerProfile for TimeSeriesProfile {
    fn power_at(&self, dt: NaiveDateTime) -> f64 {
        self.samples
            .range(..=dt)
            .next_back()
            .or_else(|| self.samples.iter().next())
            .map_or(0.0, |(_, v)| *v)
    }

    fn next_update(&self, dt: NaiveDateTime) -> Option<NaiveDateTime> {
        self.samples
            .range((std::ops::Bound::Excluded(dt), std::ops::Bound::Unbounded))
            .next()
            .map(|(t, _)| *t)
    }
}

/// Daylight-shaped solar output with deterministic noise.
///
/// Generation follows a half-sine between sunrise and sunset hours and is
/// zero at night. Noise is seeded from `seed` and the timestamp, so the same
/// instant always yields the same value. Output is non-negative.
#[derive(Debug, Clone, PartialEq)]
pub struct SolarProfile {
    /// Peak output in kilowatts.
    pub kw_peak: f64,
    /// Hour of day when generation starts (inclusive).
    pub sunrise_hour: f64,
    /// Hour of day when generation ends (exclusive).
    pub sunset_hour: f64,
    /// Standard deviation of multiplicative noise.
    pub noise_std: f64,
    /// Noise seed.
    pub seed: u64,
    /// Seconds between value changes.
    pub update_interval_secs: u32,
}

impl SolarProfile {
    /// Creates a solar profile.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidProfile` if sunrise is not before sunset,
    /// either lies outside `0..=24`, or the update interval is zero.
    pub fn new(
        kw_peak: f64,
        sunrise_hour: f64,
        sunset_hour: f64,
        noise_std: f64,
        seed: u64,
        update_interval_secs: u32,
    ) -> Result<Self, SimError> {
        if !(0.0..=24.0).contains(&sunrise_hour)
            || !(0.0..=24.0).contains(&sunset_hour)
            || sunrise_hour >= sunset_hour
        {
            return Err(SimError::InvalidProfile(format!(
                "daylight window {sunrise_hour}..{sunset_hour} is not within one day"
            )));
        }
        if update_interval_secs == 0 {
            return Err(SimError::InvalidProfile(
                "update interval must be positive".to_string(),
            ));
        }
        Ok(Self {
            kw_peak: kw_peak.max(0.0),
            sunrise_hour,
            sunset_hour,
            noise_std: noise_std.max(0.0),
            seed,
            update_interval_secs,
        })
    }

    /// Fraction of peak output at an hour of day, in `[0, 1]`.
    fn daylight_frac(&self, hour: f64) -> f64 {
        if hour < self.sunrise_hour || hour >= self.sunset_hour {
            return 0.0;
        }
        let x = (hour - self.sunrise_hour) / (self.sunset_hour - self.sunrise_hour);
        (std::f64::consts::PI * x).sin().max(0.0)
    }

    fn slot_start(&self, dt: NaiveDateTime) -> i64 {
        let ts = dt.and_utc().timestamp();
        let interval = i64::from(self.update_interval_secs);
        ts.div_euclid(interval) * interval
    }
}

/// Gaussian noise via Box-Muller.
fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    let u1: f64 = rng.random::<f64>().clamp(1e-9, 1.0);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos() * std_dev
}

impl PowerProfile for SolarProfile {
    fn power_at(&self, dt: NaiveDateTime) -> f64 {
        let slot = self.slot_start(dt);
        // Held constant within an update slot.
        let Some(slot_dt) = DateTime::from_timestamp(slot, 0).map(|d| d.naive_utc()) else {
            return 0.0;
        };
        let hour = f64::from(slot_dt.hour())
            + f64::from(slot_dt.minute()) / 60.0
            + f64::from(slot_dt.second()) / 3600.0;
        let frac = self.daylight_frac(hour);
        if frac <= 0.0 {
            return 0.0;
        }
        let mut rng = StdRng::seed_from_u64(self.seed ^ slot as u64);
        let noise_mult = 1.0 + gaussian_noise(&mut rng, self.noise_std);
        (self.kw_peak * frac * noise_mult).max(0.0)
    }

    fn next_update(&self, dt: NaiveDateTime) -> Option<NaiveDateTime> {
        let next = self.slot_start(dt) + i64::from(self.update_interval_secs);
        DateTime::from_timestamp(next, 0).map(|d| d.naive_utc())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn constant_never_updates() {
        let p = ConstantProfile::new(3.5);
        assert_eq!(p.power_at(at(0, 0)), 3.5);
        assert_eq!(p.next_update(at(0, 0)), None);
    }

    #[test]
    fn series_holds_values_between_samples() {
        let p = TimeSeriesProfile::new([(at(0, 0), 1.0), (at(0, 15), 2.0), (at(0, 30), 3.0)])
            .unwrap();
        assert_eq!(p.power_at(at(0, 14)), 1.0);
        assert_eq!(p.power_at(at(0, 15)), 2.0);
        assert_eq!(p.power_at(at(5, 0)), 3.0);
        assert_eq!(p.next_update(at(0, 0)), Some(at(0, 15)));
        assert_eq!(p.next_update(at(0, 20)), Some(at(0, 30)));
        assert_eq!(p.next_update(at(0, 30)), None);
    }

    #[test]
    fn empty_series_is_rejected() {
        let err = TimeSeriesProfile::new(std::iter::empty());
        assert!(matches!(err, Err(SimError::InvalidProfile(_))));
    }

    #[test]
    fn series_loads_from_csv() {
        let data = "time,value\n2020-06-01 00:00:00,1.5\n2020-06-01T01:00:00, 2.5\n";
        let p = TimeSeriesProfile::from_csv_reader(data.as_bytes()).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.power_at(at(0, 30)), 1.5);
        assert_eq!(p.power_at(at(1, 0)), 2.5);
    }

    #[test]
    fn series_rejects_bad_timestamps() {
        let data = "time,value\nyesterday,1.0\n";
        assert!(matches!(
            TimeSeriesProfile::from_csv_reader(data.as_bytes()),
            Err(SimError::InvalidProfile(_))
        ));
    }

    #[test]
    fn solar_is_zero_at_night_and_peaks_at_noon() {
        let p = SolarProfile::new(5.0, 6.0, 18.0, 0.0, 42, 900).unwrap();
        assert_eq!(p.power_at(at(2, 0)), 0.0);
        assert_eq!(p.power_at(at(18, 0)), 0.0);
        let noon = p.power_at(at(12, 0));
        assert!(noon > 4.99 && noon <= 5.0);
        assert!((p.power_at(at(9, 0)) - p.power_at(at(15, 0))).abs() < 1e-9);
    }

    #[test]
    fn solar_noise_is_a_function_of_time() {
        let p = SolarProfile::new(5.0, 6.0, 18.0, 0.2, 7, 900).unwrap();
        let q = SolarProfile::new(5.0, 6.0, 18.0, 0.2, 7, 900).unwrap();
        for h in 6..18 {
            assert_eq!(p.power_at(at(h, 0)), p.power_at(at(h, 0)));
            assert_eq!(p.power_at(at(h, 0)), q.power_at(at(h, 0)));
            assert!(p.power_at(at(h, 0)) >= 0.0);
        }
    }

    #[test]
    fn solar_holds_within_update_slot() {
        let p = SolarProfile::new(5.0, 6.0, 18.0, 0.1, 1, 900).unwrap();
        assert_eq!(p.power_at(at(10, 0)), p.power_at(at(10, 14)));
        assert_eq!(p.next_update(at(10, 3)), Some(at(10, 15)));
        assert_eq!(p.next_update(at(10, 15)), Some(at(10, 30)));
    }

    #[test]
    fn solar_rejects_inverted_window() {
        assert!(SolarProfile::new(5.0, 18.0, 6.0, 0.0, 1, 900).is_err());
        assert!(SolarProfile::new(5.0, 6.0, 18.0, 0.0, 1, 0).is_err());
    }
}
