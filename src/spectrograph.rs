//! Exposure façade: one call from request to data file.
//!
//! [`FiberSpectrograph`] owns a connected [`ConnectionManager`] and a
//! [`DataPackager`]. [`expose`](FiberSpectrograph::expose) reads the device
//! temperatures, runs one acquisition, and packages the result. The last
//! observed [`ExposureState`] is kept for status reporting.

use crate::config::SpectrographConfig;
use crate::data::{DataPackager, ExposureRecord, TaiTime};
use crate::error::{AppResult, SpectrographError};
use crate::hardware::acquisition::{self, AcquisitionController, ExposureOutcome, DEFAULT_POLL_INTERVAL};
use crate::hardware::connection::{ConnectionManager, DeviceStatus};
use crate::hardware::driver::AvsDriver;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Default extra wait beyond the integration time in
/// [`expose_with_timeout`](FiberSpectrograph::expose_with_timeout).
pub const DEFAULT_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// One exposure as requested by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureRequest {
    /// Integration time in seconds.
    pub duration: f64,
    /// Measurement type tag, written to `IMGTYPE`.
    pub exposure_type: String,
    /// Light source tag, written to `SOURCE`.
    pub source: String,
}

impl ExposureRequest {
    /// Request of `duration` seconds with the given header tags.
    pub fn new(duration: f64, exposure_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            duration,
            exposure_type: exposure_type.into(),
            source: source.into(),
        }
    }
}

/// Progress of the most recent exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureState {
    /// The device is integrating.
    Integrating,
    /// The exposure was packaged, and written if an output directory is set.
    Done,
    /// An error ended the exposure.
    Failed,
    /// Cancelled by the caller; nothing was written.
    Cancelled,
    /// The exposure ran past its deadline and was stopped.
    TimedOut,
}

/// What a finished exposure produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExposureResult {
    /// The data file was built.
    Saved {
        /// `<instrument>_<DATE-BEG>.fits`
        file_name: String,
        /// Where the file was written; `None` without an output directory.
        path: Option<PathBuf>,
    },
    /// Cancelled before data was read back.
    Cancelled,
}

/// A connected spectrograph that turns exposure requests into data files.
pub struct FiberSpectrograph<D: AvsDriver> {
    connection: ConnectionManager<D>,
    packager: DataPackager,
    poll_interval: Duration,
    timeout_margin: Duration,
    last_state: Option<ExposureState>,
}

impl<D: AvsDriver> FiberSpectrograph<D> {
    /// Wrap an open connection, with default poll interval and timeout margin.
    pub fn new(connection: ConnectionManager<D>, packager: DataPackager) -> Self {
        Self {
            connection,
            packager,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout_margin: DEFAULT_TIMEOUT_MARGIN,
            last_state: None,
        }
    }

    /// Connect to the device named by `config` and set up packaging.
    pub fn open(driver: D, config: &SpectrographConfig) -> AppResult<Self> {
        let serial_number = config.serial_number();
        let connection = ConnectionManager::open(driver, serial_number.as_deref())?;
        let packager = DataPackager::new(
            config.instrument(),
            config.storage.origin.clone(),
            config.storage.output_dir.clone(),
        );
        Ok(Self::new(connection, packager)
            .with_poll_interval(config.poll_interval())
            .with_timeout_margin(config.timeout_margin()))
    }

    /// Delay between scan-ready polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Extra wait allowed by [`expose_with_timeout`](Self::expose_with_timeout).
    pub fn with_timeout_margin(mut self, timeout_margin: Duration) -> Self {
        self.timeout_margin = timeout_margin;
        self
    }

    /// The underlying connection.
    pub fn connection(&self) -> &ConnectionManager<D> {
        &self.connection
    }

    /// The packager used for every exposure.
    pub fn packager(&self) -> &DataPackager {
        &self.packager
    }

    /// State of the last exposure, `None` before the first one.
    pub fn last_state(&self) -> Option<ExposureState> {
        self.last_state
    }

    /// Device status; `full` also reads the raw device parameters.
    pub fn status(&mut self, full: bool) -> AppResult<DeviceStatus> {
        self.connection.status(full)
    }

    /// Reject a request before any driver call is made.
    pub fn check_expose_ok(&self, duration_s: f64) -> AppResult<()> {
        self.connection.active()?;
        acquisition::validate_duration(duration_s)
    }

    /// [`check_expose_ok`](Self::check_expose_ok) plus the header tags, which
    /// must be printable ASCII to be written.
    fn check_request(&self, request: &ExposureRequest) -> AppResult<()> {
        self.check_expose_ok(request.duration)?;
        for (name, tag) in [
            ("exposure type", &request.exposure_type),
            ("source", &request.source),
        ] {
            if !tag.chars().all(|c| c == ' ' || c.is_ascii_graphic()) {
                return Err(SpectrographError::InvalidRecord(format!(
                    "{name} must be printable ASCII, got {tag:?}"
                )));
            }
        }
        Ok(())
    }

    /// Take one exposure and package it.
    ///
    /// Cancelling `cancel` stops the measurement and yields
    /// [`ExposureResult::Cancelled`]; nothing is written in that case.
    #[instrument(skip(self, cancel), fields(duration = request.duration))]
    pub async fn expose(
        &mut self,
        request: &ExposureRequest,
        cancel: &CancellationToken,
    ) -> AppResult<ExposureResult> {
        self.check_request(request)?;

        let result = self.run(request, cancel).await;
        let state = match &result {
            Ok(ExposureResult::Saved { .. }) => ExposureState::Done,
            Ok(ExposureResult::Cancelled) => ExposureState::Cancelled,
            Err(err) => {
                tracing::error!(stage = %err.stage(), error = %err, "Failed to take exposure");
                ExposureState::Failed
            }
        };
        self.set_state(state);
        result
    }

    /// [`expose`](Self::expose), bounded by the duration plus the timeout margin.
    ///
    /// On timeout the running measurement is stopped before this returns.
    pub async fn expose_with_timeout(
        &mut self,
        request: &ExposureRequest,
        cancel: &CancellationToken,
    ) -> AppResult<ExposureResult> {
        self.check_request(request)?;
        let waited = Duration::from_secs_f64(request.duration).saturating_add(self.timeout_margin);

        let result = tokio::time::timeout(waited, self.expose(request, cancel)).await;
        match result {
            Ok(result) => result,
            Err(_) => {
                self.set_state(ExposureState::TimedOut);
                let err = SpectrographError::ExposureTimedOut { waited };
                tracing::error!(error = %err, "Timeout waiting for exposure");
                Err(err)
            }
        }
    }

    /// Release the device and close the library session.
    pub fn close(mut self) {
        self.connection.disconnect();
    }

    async fn run(
        &mut self,
        request: &ExposureRequest,
        cancel: &CancellationToken,
    ) -> AppResult<ExposureResult> {
        let status = self.connection.status(false)?;

        let date_begin = TaiTime::now();
        self.set_state(ExposureState::Integrating);
        let outcome = {
            let mut controller = AcquisitionController::new(&mut self.connection)?
                .with_poll_interval(self.poll_interval);
            controller.run_exposure(request.duration, cancel).await?
        };
        let date_end = TaiTime::now();

        let measurement = match outcome {
            ExposureOutcome::Completed(measurement) => measurement,
            ExposureOutcome::Aborted => return Ok(ExposureResult::Cancelled),
        };

        let record = ExposureRecord {
            n_pixels: measurement.spectrum.len(),
            wavelength: measurement.wavelength,
            spectrum: measurement.spectrum,
            duration: request.duration,
            date_begin,
            date_end,
            exposure_type: request.exposure_type.clone(),
            source: request.source.clone(),
            temperature: status.temperature,
            temperature_setpoint: status.temperature_setpoint,
        };
        let container = self.packager.package(&record)?;
        let file_name = DataPackager::file_name(&container)?;
        let path = self.packager.persist(&container)?;
        Ok(ExposureResult::Saved { file_name, path })
    }

    fn set_state(&mut self, state: ExposureState) {
        tracing::info!(?state, "Exposure state changed");
        self.last_state = Some(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockAvsDriver, Operation, PollStep};

    fn connected(driver: MockAvsDriver) -> FiberSpectrograph<MockAvsDriver> {
        let connection = ConnectionManager::open(driver, None).unwrap();
        let packager = DataPackager::new("TestBlue", "Unit Test", None);
        FiberSpectrograph::new(connection, packager).with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn out_of_range_duration_makes_no_driver_call() {
        let driver = MockAvsDriver::simulator("A", "unit A");
        let recorder = driver.recorder();
        let spectrograph = connected(driver);
        let calls_before = recorder.calls().len();
        assert!(matches!(
            spectrograph.check_expose_ok(601.0),
            Err(SpectrographError::ExposureOutOfRange { .. })
        ));
        assert!(spectrograph.check_expose_ok(1e-7).is_err());
        assert!(spectrograph.check_expose_ok(1.0).is_ok());
        assert_eq!(recorder.calls().len(), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn expose_without_output_dir_names_the_file() {
        let driver = MockAvsDriver::simulator("A", "unit A")
            .with_poll_script([PollStep::NotReady, PollStep::Ready]);
        let mut spectrograph = connected(driver);
        let request = ExposureRequest::new(0.5, "flat", "lamp");
        let result = spectrograph.expose(&request, &CancellationToken::new()).await.unwrap();
        let ExposureResult::Saved { file_name, path } = result else {
            panic!("expected a saved exposure");
        };
        assert!(file_name.starts_with("TestBlue_"));
        assert!(file_name.ends_with(".fits"));
        assert_eq!(path, None);
        assert_eq!(spectrograph.last_state(), Some(ExposureState::Done));
    }

    #[tokio::test]
    async fn unprintable_tag_is_rejected_before_the_device() {
        let driver = MockAvsDriver::simulator("A", "unit A");
        let recorder = driver.recorder();
        let mut spectrograph = connected(driver);
        let calls_before = recorder.calls().len();
        let request = ExposureRequest::new(1.0, "flat", "Ångström lamp");
        let err = spectrograph
            .expose(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SpectrographError::InvalidRecord(_)));
        assert_eq!(recorder.calls().len(), calls_before);
        assert_eq!(spectrograph.last_state(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_exposure_stops_immediately() {
        let driver = MockAvsDriver::simulator("A", "unit A");
        let recorder = driver.recorder();
        let mut spectrograph = connected(driver);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = spectrograph
            .expose(&ExposureRequest::new(1.0, "dark", "none"), &cancel)
            .await
            .unwrap();
        assert_eq!(result, ExposureResult::Cancelled);
        assert_eq!(spectrograph.last_state(), Some(ExposureState::Cancelled));
        assert_eq!(recorder.count(Operation::StopMeasure), 1);
        assert!(!recorder.called(Operation::PollScan));
    }
}
