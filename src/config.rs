//! Configuration loaded with Figment.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. a TOML file (`config/fiber_spectrograph.toml` unless another path is given)
//! 3. environment variables prefixed with `FIBERSPEC_`, using `__` between
//!    section and key, e.g. `FIBERSPEC_DEVICE__SERIAL_NUMBER=1606192U1`
//!
//! A missing TOML file is not an error; every field has a default.
//!
//! # Example
//! ```no_run
//! use fiber_spectrograph::config::SpectrographConfig;
//!
//! let config = SpectrographConfig::load()?;
//! config.validate()?;
//! println!("Instrument: {}", config.instrument());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/fiber_spectrograph.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FIBERSPEC_";

/// Device index meaning "the only attached spectrograph".
pub const ANY_DEVICE_INDEX: i32 = -1;

/// Known instruments as `(index, name, serial number)`.
pub const KNOWN_INSTRUMENTS: [(i32, &str, &str); 3] = [
    (1, "MTBlue", "1606192U1"),
    (2, "MTRed", "1606190U1"),
    (3, "ATBroad", "1606191U1"),
];

/// Largest accepted `acquisition.timeout_margin_s`, one hour.
pub const MAX_TIMEOUT_MARGIN_S: f64 = 3600.0;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrographConfig {
    /// `[application]`
    pub application: ApplicationConfig,
    /// `[device]`
    pub device: DeviceConfig,
    /// `[acquisition]`
    pub acquisition: AcquisitionConfig,
    /// `[storage]`
    pub storage: StorageConfig,
    /// `[simulation]`
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

/// Which spectrograph to talk to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Instrument index; -1 selects the only attached device.
    pub index: i32,
    /// Overrides the serial number implied by `index`.
    pub serial_number: Option<String>,
    /// Overrides the instrument name implied by `index`.
    pub instrument: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            index: ANY_DEVICE_INDEX,
            serial_number: None,
            instrument: None,
        }
    }
}

/// Acquisition loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Delay between scan-ready polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Extra time allowed beyond the integration time before an exposure
    /// is considered timed out, in seconds
    pub timeout_margin_s: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_margin_s: default_timeout_margin_s(),
        }
    }
}

/// Data file output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for data files; unset means files are built but not written
    pub output_dir: Option<PathBuf>,
    /// Producer name written to the `ORIGIN` keyword
    pub origin: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            origin: default_origin(),
        }
    }
}

/// Simulator selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Use the in-process simulator instead of `libavs`
    pub enabled: bool,
}

// Default value functions
fn default_poll_interval_ms() -> u64 {
    100
}

fn default_timeout_margin_s() -> f64 {
    5.0
}

fn default_origin() -> String {
    "FiberSpectrograph".into()
}

impl SpectrographConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that deserialize fine but make no sense.
    pub fn validate(&self) -> Result<(), String> {
        let level = self.application.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        if self.acquisition.poll_interval_ms == 0 {
            return Err("acquisition.poll_interval_ms must be greater than 0".into());
        }
        if !(0.0..=MAX_TIMEOUT_MARGIN_S).contains(&self.acquisition.timeout_margin_s) {
            return Err(format!(
                "acquisition.timeout_margin_s must be between 0 and {MAX_TIMEOUT_MARGIN_S}, got {}",
                self.acquisition.timeout_margin_s
            ));
        }

        if self.device.index != ANY_DEVICE_INDEX && known_instrument(self.device.index).is_none() {
            return Err(format!(
                "Unknown device index {}. Must be {ANY_DEVICE_INDEX} or one of: {}",
                self.device.index,
                KNOWN_INSTRUMENTS
                    .iter()
                    .map(|(index, name, _)| format!("{index} ({name})"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        if self.storage.origin.trim().is_empty() {
            return Err("storage.origin must not be empty".into());
        }

        Ok(())
    }

    /// Serial number to connect to, or `None` for "the only attached device".
    pub fn serial_number(&self) -> Option<String> {
        self.device
            .serial_number
            .clone()
            .or_else(|| known_instrument(self.device.index).map(|(_, _, serial)| serial.to_owned()))
    }

    /// Instrument name written to data files.
    pub fn instrument(&self) -> String {
        self.device.instrument.clone().unwrap_or_else(|| {
            known_instrument(self.device.index)
                .map_or_else(|| "unknown".to_owned(), |(_, name, _)| name.to_owned())
        })
    }

    /// Delay between scan-ready polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.acquisition.poll_interval_ms)
    }

    /// Timeout margin, clamped to `0..=MAX_TIMEOUT_MARGIN_S`.
    ///
    /// A value that is not a number falls back to the default margin.
    pub fn timeout_margin(&self) -> Duration {
        let seconds = self
            .acquisition
            .timeout_margin_s
            .clamp(0.0, MAX_TIMEOUT_MARGIN_S);
        Duration::try_from_secs_f64(seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_timeout_margin_s()))
    }
}

fn known_instrument(index: i32) -> Option<(i32, &'static str, &'static str)> {
    KNOWN_INSTRUMENTS
        .iter()
        .copied()
        .find(|(known, _, _)| *known == index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = SpectrographConfig::load_from("does/not/exist.toml")?;
            assert_eq!(config, SpectrographConfig::default());
            assert_eq!(config.poll_interval(), Duration::from_millis(100));
            assert_eq!(config.timeout_margin(), Duration::from_secs(5));
            assert_eq!(config.serial_number(), None);
            assert_eq!(config.instrument(), "unknown");
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn load_from_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "spectrograph.toml",
                r#"
                [application]
                log_level = "debug"

                [device]
                index = 2

                [acquisition]
                poll_interval_ms = 20

                [storage]
                output_dir = "/data/fiberspec"
                "#,
            )?;
            let config = SpectrographConfig::load_from("spectrograph.toml")?;
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.serial_number().as_deref(), Some("1606190U1"));
            assert_eq!(config.instrument(), "MTRed");
            assert_eq!(config.poll_interval(), Duration::from_millis(20));
            assert_eq!(config.acquisition.timeout_margin_s, 5.0);
            assert_eq!(
                config.storage.output_dir.as_deref(),
                Some(Path::new("/data/fiberspec"))
            );
            assert_eq!(config.storage.origin, "FiberSpectrograph");
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("spectrograph.toml", "[device]\nindex = 1\n")?;
            jail.set_env("FIBERSPEC_DEVICE__SERIAL_NUMBER", "XYZ123");
            jail.set_env("FIBERSPEC_SIMULATION__ENABLED", "true");
            let config = SpectrographConfig::load_from("spectrograph.toml")?;
            assert_eq!(config.serial_number().as_deref(), Some("XYZ123"));
            assert_eq!(config.instrument(), "MTBlue");
            assert!(config.simulation.enabled);
            Ok(())
        });
    }

    #[test]
    fn invalid_log_level() {
        let mut config = SpectrographConfig::default();
        config.application.log_level = "loud".into();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log level"));
    }

    #[test]
    fn unknown_device_index() {
        let mut config = SpectrographConfig::default();
        config.device.index = 7;
        let err = config.validate().unwrap_err();
        assert!(err.contains("Unknown device index 7"));
    }

    #[test]
    fn huge_timeout_margin_is_rejected_without_panicking() {
        Jail::expect_with(|jail| {
            jail.create_file("spectrograph.toml", "[acquisition]\ntimeout_margin_s = 1e20\n")?;
            let config = SpectrographConfig::load_from("spectrograph.toml")?;
            let err = config.validate().unwrap_err();
            assert!(err.contains("timeout_margin_s"));
            assert_eq!(
                config.timeout_margin(),
                Duration::from_secs_f64(MAX_TIMEOUT_MARGIN_S)
            );
            Ok(())
        });
    }

    #[test]
    fn unusable_timeout_margins() {
        let mut config = SpectrographConfig::default();
        config.acquisition.timeout_margin_s = -1.0;
        assert!(config.validate().is_err());
        assert_eq!(config.timeout_margin(), Duration::ZERO);

        config.acquisition.timeout_margin_s = f64::NAN;
        assert!(config.validate().is_err());
        assert_eq!(config.timeout_margin(), Duration::from_secs(5));

        config.acquisition.timeout_margin_s = f64::INFINITY;
        assert!(config.validate().is_err());
        assert_eq!(config.timeout_margin(), Duration::from_secs(3600));

        config.acquisition.timeout_margin_s = MAX_TIMEOUT_MARGIN_S;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_poll_interval() {
        let mut config = SpectrographConfig::default();
        config.acquisition.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
