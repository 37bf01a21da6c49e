//! Exposure record and TAI timestamps.

use crate::error::{AppResult, SpectrographError};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

/// Timestamp format used in headers and file names (millisecond precision).
pub const FITS_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// TAI - UTC, in seconds, from each UTC date on.
const LEAP_SECONDS: [((i32, u32, u32), i64); 28] = [
    ((1972, 1, 1), 10),
    ((1972, 7, 1), 11),
    ((1973, 1, 1), 12),
    ((1974, 1, 1), 13),
    ((1975, 1, 1), 14),
    ((1976, 1, 1), 15),
    ((1977, 1, 1), 16),
    ((1978, 1, 1), 17),
    ((1979, 1, 1), 18),
    ((1980, 1, 1), 19),
    ((1981, 7, 1), 20),
    ((1982, 7, 1), 21),
    ((1983, 7, 1), 22),
    ((1985, 7, 1), 23),
    ((1988, 1, 1), 24),
    ((1990, 1, 1), 25),
    ((1991, 1, 1), 26),
    ((1992, 7, 1), 27),
    ((1993, 7, 1), 28),
    ((1994, 7, 1), 29),
    ((1996, 1, 1), 30),
    ((1997, 7, 1), 31),
    ((1999, 1, 1), 32),
    ((2006, 1, 1), 33),
    ((2009, 1, 1), 34),
    ((2012, 7, 1), 35),
    ((2015, 7, 1), 36),
    ((2017, 1, 1), 37),
];

/// TAI - UTC at a UTC instant. Dates before 1972 use the 1972 offset.
pub fn tai_minus_utc(utc: &DateTime<Utc>) -> i64 {
    let date = utc.date_naive();
    LEAP_SECONDS
        .iter()
        .rev()
        .find(|((y, m, d), _)| NaiveDate::from_ymd_opt(*y, *m, *d).is_some_and(|start| date >= start))
        .map_or(LEAP_SECONDS[0].1, |(_, offset)| *offset)
}

/// An instant on the TAI time scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaiTime(NaiveDateTime);

impl TaiTime {
    /// Current time from the system clock.
    pub fn now() -> Self {
        Self::from_utc(&Utc::now())
    }

    /// Convert a UTC instant using the leap-second table.
    pub fn from_utc(utc: &DateTime<Utc>) -> Self {
        Self(utc.naive_utc() + Duration::seconds(tai_minus_utc(utc)))
    }

    /// Wrap a calendar time already expressed in TAI.
    pub fn from_naive(tai: NaiveDateTime) -> Self {
        Self(tai)
    }

    /// Parse an ISO-8601 TAI timestamp such as `1999-01-01T00:00:00.000`.
    pub fn parse(text: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(Self)
    }

    /// The TAI calendar time.
    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    /// Header/file-name representation, truncated to milliseconds.
    pub fn to_fits(&self) -> String {
        self.0.format(FITS_TIME_FORMAT).to_string()
    }

    /// Seconds elapsed since `earlier` (negative if `earlier` is later).
    pub fn seconds_since(&self, earlier: &TaiTime) -> f64 {
        let delta = self.0 - earlier.0;
        delta.num_microseconds().map_or_else(
            || delta.num_milliseconds() as f64 / 1e3,
            |us| us as f64 / 1e6,
        )
    }
}

impl fmt::Display for TaiTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_fits())
    }
}

/// One exposure and the device state it was taken in.
///
/// The packager takes ownership; nothing is retained after persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureRecord {
    /// Wavelength of each pixel, in nm.
    pub wavelength: Vec<f64>,
    /// Intensity of each pixel, in instrument units.
    pub spectrum: Vec<f64>,
    /// Requested integration time, in seconds.
    pub duration: f64,
    /// Start of integration.
    pub date_begin: TaiTime,
    /// End of integration.
    pub date_end: TaiTime,
    /// Measurement type tag (e.g. `"flat"`).
    pub exposure_type: String,
    /// Light source tag.
    pub source: String,
    /// Optical bench temperature, degC.
    pub temperature: f64,
    /// Detector temperature setpoint, degC.
    pub temperature_setpoint: f64,
    /// Detector size; both arrays have this length.
    pub n_pixels: usize,
}

impl ExposureRecord {
    /// Check the array lengths, time ordering and numeric fields.
    pub fn validate(&self) -> AppResult<()> {
        if self.wavelength.len() != self.n_pixels || self.spectrum.len() != self.n_pixels {
            return Err(SpectrographError::InvalidRecord(format!(
                "array lengths (wavelength {}, spectrum {}) do not match n_pixels {}",
                self.wavelength.len(),
                self.spectrum.len(),
                self.n_pixels
            )));
        }
        if self.date_end < self.date_begin {
            return Err(SpectrographError::InvalidRecord(format!(
                "date_end {} is before date_begin {}",
                self.date_end, self.date_begin
            )));
        }
        for (name, value) in [
            ("duration", self.duration),
            ("temperature", self.temperature),
            ("temperature_setpoint", self.temperature_setpoint),
        ] {
            if !value.is_finite() {
                return Err(SpectrographError::InvalidRecord(format!(
                    "{name} is not a finite number: {value}"
                )));
            }
        }
        Ok(())
    }
}
