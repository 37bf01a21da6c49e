//! Single-exposure state machine.
//!
//! ```text
//! Idle -> Configuring -> Triggered -> Polling -> Ready -> Retrieved
//!              \              \           \
//!               +--------------+-----------+--> Aborted
//! ```
//!
//! `AcquisitionController` borrows the [`ConnectionManager`] mutably for the
//! whole exposure, so no other driver call can interleave with it. `poll` is a
//! single non-blocking query; [`run_exposure`] composes it with a fixed poll
//! interval and a cancellation token. There is no built-in timeout: callers
//! that want one wrap the future in `tokio::time::timeout`, and dropping the
//! controller mid-exposure issues `StopMeasure`.
//!
//! [`run_exposure`]: AcquisitionController::run_exposure

use super::connection::ConnectionManager;
use super::driver::{AvsDriver, DeviceHandle, MeasureConfig};
use super::return_code::{AvsCode, AvsReturnCode};
use crate::error::{AppResult, SpectrographError, Stage};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shortest integration time the hardware accepts, in seconds.
pub const MIN_DURATION_S: f64 = 2e-6;
/// Longest integration time the hardware accepts, in seconds.
pub const MAX_DURATION_S: f64 = 600.0;
/// Delay between successive `PollScan` calls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Check an exposure duration against the hardware limits.
pub fn validate_duration(duration_s: f64) -> AppResult<()> {
    if (MIN_DURATION_S..=MAX_DURATION_S).contains(&duration_s) {
        Ok(())
    } else {
        Err(SpectrographError::ExposureOutOfRange {
            duration_s,
            min_s: MIN_DURATION_S,
            max_s: MAX_DURATION_S,
        })
    }
}

/// Where an [`AcquisitionController`] is in its exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Nothing configured yet.
    Idle,
    /// `PrepareMeasure` accepted.
    Configuring,
    /// `Measure` accepted; integrating.
    Triggered,
    /// Waiting for the scan to become ready.
    Polling,
    /// Scan data can be read.
    Ready,
    /// Data read back; the exposure is finished.
    Retrieved,
    /// Stopped before completion.
    Aborted,
}

impl AcquisitionState {
    /// A measurement is running on the device.
    fn is_measuring(self) -> bool {
        matches!(self, Self::Triggered | Self::Polling | Self::Ready)
    }
}

/// Raw arrays read back from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Wavelength of each pixel, in nm.
    pub wavelength: Vec<f64>,
    /// Intensity of each pixel, in instrument units.
    pub spectrum: Vec<f64>,
}

/// How an exposure ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExposureOutcome {
    /// The scan finished and was read back.
    Completed(Measurement),
    /// Cancelled; the device was told to stop and no data was kept.
    Aborted,
}

/// Drives one exposure on an active connection.
pub struct AcquisitionController<'a, D: AvsDriver> {
    connection: &'a mut ConnectionManager<D>,
    handle: DeviceHandle,
    n_pixels: usize,
    state: AcquisitionState,
    poll_interval: Duration,
}

impl<'a, D: AvsDriver> AcquisitionController<'a, D> {
    /// Fails with `NotConnected` if the manager has no active handle.
    pub fn new(connection: &'a mut ConnectionManager<D>) -> AppResult<Self> {
        let active = connection.active()?;
        let handle = active.handle;
        let n_pixels = active.n_pixels;
        Ok(Self {
            connection,
            handle,
            n_pixels,
            state: AcquisitionState::Idle,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Delay between `PollScan` calls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Current state.
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Detector size of the active device.
    pub fn n_pixels(&self) -> usize {
        self.n_pixels
    }

    fn driver(&mut self) -> &mut D {
        self.connection.driver_mut()
    }

    fn require(&self, stage: Stage, allowed: &[AcquisitionState]) -> AppResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SpectrographError::OutOfSequence {
                stage,
                state: self.state,
            })
        }
    }

    /// Send the measurement configuration for one integration of `duration_s` seconds.
    pub fn configure(&mut self, duration_s: f64) -> AppResult<MeasureConfig> {
        if self.state != AcquisitionState::Idle {
            return Err(SpectrographError::ExposureInProgress);
        }
        validate_duration(duration_s)?;
        self.state = AcquisitionState::Configuring;

        let config = MeasureConfig::for_integration(self.n_pixels, (duration_s * 1000.0) as f32);
        let handle = self.handle;
        let code = self.driver().prepare_measure(handle, &config);
        if code.is_error() {
            self.state = AcquisitionState::Aborted;
            return Err(SpectrographError::ConfigurationRejected { code });
        }
        tracing::debug!(%handle, "Measurement configured");
        Ok(config)
    }

    /// Start a single scan with a configuration returned by [`configure`](Self::configure).
    pub fn trigger(&mut self, config: &MeasureConfig) -> AppResult<()> {
        self.require(Stage::Trigger, &[AcquisitionState::Configuring])?;
        let handle = self.handle;
        let code = self.driver().measure(handle, MeasureConfig::N_SCANS);
        if code.is_error() {
            self.state = AcquisitionState::Aborted;
            return Err(SpectrographError::TriggerRejected { code });
        }
        self.state = AcquisitionState::Triggered;
        tracing::debug!(
            %handle,
            integration_ms = config.integration_time_ms,
            "Measurement triggered"
        );
        Ok(())
    }

    /// Ask the device once whether the scan is complete.
    pub fn poll(&mut self) -> AppResult<bool> {
        self.require(
            Stage::Poll,
            &[AcquisitionState::Triggered, AcquisitionState::Polling],
        )?;
        let handle = self.handle;
        match self.driver().poll_scan(handle) {
            Ok(true) => {
                self.state = AcquisitionState::Ready;
                Ok(true)
            }
            Ok(false) => {
                self.state = AcquisitionState::Polling;
                Ok(false)
            }
            Err(code) => {
                self.stop_quietly();
                Err(SpectrographError::PollFailed { code })
            }
        }
    }

    /// Read the wavelength and intensity arrays of a completed scan.
    ///
    /// If either read fails the exposure is aborted and nothing is returned.
    pub fn retrieve(&mut self) -> AppResult<Measurement> {
        self.require(Stage::Retrieve, &[AcquisitionState::Ready])?;
        let handle = self.handle;
        let n_pixels = self.n_pixels;

        let wavelength = self
            .fetch("GetLambda", |driver| driver.get_lambda(handle, n_pixels))?;
        let spectrum = self
            .fetch("GetScopeData", |driver| driver.get_scope_data(handle, n_pixels))?;

        self.state = AcquisitionState::Retrieved;
        tracing::debug!(%handle, n_pixels, "Measurement retrieved");
        Ok(Measurement {
            wavelength,
            spectrum,
        })
    }

    fn fetch(
        &mut self,
        what: &'static str,
        read: impl FnOnce(&mut D) -> Result<Vec<f64>, AvsCode>,
    ) -> AppResult<Vec<f64>> {
        let n_pixels = self.n_pixels;
        let result = read(self.driver()).and_then(|values| {
            if values.len() == n_pixels {
                Ok(values)
            } else {
                Err(AvsReturnCode::InvalidSize.into())
            }
        });
        result.map_err(|code| {
            self.state = AcquisitionState::Aborted;
            SpectrographError::RetrievalFailed {
                what,
                n_pixels,
                code,
            }
        })
    }

    /// Cancel a running measurement.
    ///
    /// Safe in any state; only a running measurement reaches the driver.
    pub fn stop(&mut self) -> AppResult<()> {
        match self.state {
            state if state.is_measuring() => {
                self.state = AcquisitionState::Aborted;
                let handle = self.handle;
                let code = self.driver().stop_measure(handle);
                tracing::warn!(%handle, "Measurement stopped");
                code.check()
                    .map_err(|code| SpectrographError::StopFailed { code })
            }
            AcquisitionState::Configuring => {
                self.state = AcquisitionState::Aborted;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn stop_quietly(&mut self) {
        if let Err(err) = self.stop() {
            tracing::error!(error = %err, "Failed to stop measurement");
        }
        self.state = AcquisitionState::Aborted;
    }

    /// Run configure, trigger, poll and retrieve for one integration.
    ///
    /// Polls every `poll_interval`, yielding to the runtime in between. When
    /// `cancel` fires the measurement is stopped and `Aborted` is returned.
    pub async fn run_exposure(
        &mut self,
        duration_s: f64,
        cancel: &CancellationToken,
    ) -> AppResult<ExposureOutcome> {
        let config = self.configure(duration_s)?;
        self.trigger(&config)?;

        loop {
            if cancel.is_cancelled() {
                return self.abort();
            }
            if self.poll()? {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.abort(),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        Ok(ExposureOutcome::Completed(self.retrieve()?))
    }

    fn abort(&mut self) -> AppResult<ExposureOutcome> {
        tracing::info!(handle = %self.handle, "Exposure cancelled");
        self.stop()?;
        Ok(ExposureOutcome::Aborted)
    }
}

impl<D: AvsDriver> Drop for AcquisitionController<'_, D> {
    fn drop(&mut self) {
        if self.state.is_measuring() {
            tracing::warn!(handle = %self.handle, "Exposure dropped while running, stopping measurement");
            self.stop_quietly();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::driver::DeviceIdentity;
    use crate::hardware::mock::{ErrorConfig, ErrorScenario, MockAvsDriver, Operation, PollStep};

    fn connected(driver: MockAvsDriver) -> ConnectionManager<MockAvsDriver> {
        ConnectionManager::open(driver, None).unwrap()
    }

    fn single_unit() -> MockAvsDriver {
        MockAvsDriver::new(vec![DeviceIdentity::new("A", "unit A")])
    }

    #[test]
    fn duration_limits() {
        assert!(validate_duration(MIN_DURATION_S).is_ok());
        assert!(validate_duration(MAX_DURATION_S).is_ok());
        assert!(validate_duration(0.0).is_err());
        assert!(validate_duration(600.5).is_err());
        assert!(validate_duration(f64::NAN).is_err());
    }

    #[test]
    fn configure_sends_integration_time_in_ms() {
        let driver = single_unit();
        let recorder = driver.recorder();
        let mut manager = connected(driver);
        let mut controller = AcquisitionController::new(&mut manager).unwrap();
        let config = controller.configure(2.5).unwrap();
        assert_eq!(config.integration_time_ms, 2500.0);
        assert_eq!(config.stop_pixel, 2047);
        assert_eq!(controller.state(), AcquisitionState::Configuring);
        drop(controller);
        assert!(!recorder.called(Operation::StopMeasure));
    }

    #[test]
    fn second_configure_is_rejected() {
        let mut manager = connected(single_unit());
        let mut controller = AcquisitionController::new(&mut manager).unwrap();
        controller.configure(1.0).unwrap();
        assert!(matches!(
            controller.configure(1.0),
            Err(SpectrographError::ExposureInProgress)
        ));
    }

    #[test]
    fn rejected_configuration_aborts() {
        let code = AvsCode::from(AvsReturnCode::InvalidMeasparamDyndark);
        let driver = single_unit().with_errors(ErrorConfig::scenario(ErrorScenario::Always {
            operation: Operation::PrepareMeasure,
            code,
        }));
        let mut manager = connected(driver);
        let mut controller = AcquisitionController::new(&mut manager).unwrap();
        let err = controller.configure(1.0).unwrap_err();
        assert_eq!(err.driver_code(), Some(code));
        assert_eq!(controller.state(), AcquisitionState::Aborted);
    }

    #[test]
    fn poll_before_trigger_is_out_of_sequence() {
        let mut manager = connected(single_unit());
        let mut controller = AcquisitionController::new(&mut manager).unwrap();
        let err = controller.poll().unwrap_err();
        assert_eq!(err.stage(), Stage::Poll);
    }

    #[test]
    fn stop_is_idempotent() {
        let driver = single_unit().with_poll_script([PollStep::NotReady]);
        let recorder = driver.recorder();
        let mut manager = connected(driver);
        let mut controller = AcquisitionController::new(&mut manager).unwrap();
        controller.stop().unwrap();
        let config = controller.configure(1.0).unwrap();
        controller.trigger(&config).unwrap();
        assert!(!controller.poll().unwrap());
        controller.stop().unwrap();
        controller.stop().unwrap();
        assert_eq!(controller.state(), AcquisitionState::Aborted);
        drop(controller);
        assert_eq!(recorder.count(Operation::StopMeasure), 1);
    }

    #[test]
    fn partial_fetch_discards_wavelengths() {
        let code = AvsCode::from(AvsReturnCode::Communication);
        let driver = single_unit()
            .with_poll_script([PollStep::Ready])
            .with_errors(ErrorConfig::scenario(ErrorScenario::Always {
                operation: Operation::GetScopeData,
                code,
            }));
        let recorder = driver.recorder();
        let mut manager = connected(driver);
        let mut controller = AcquisitionController::new(&mut manager).unwrap();
        let config = controller.configure(0.5).unwrap();
        controller.trigger(&config).unwrap();
        assert!(controller.poll().unwrap());
        let err = controller.retrieve().unwrap_err();
        assert!(matches!(
            err,
            SpectrographError::RetrievalFailed { what: "GetScopeData", n_pixels: 2048, .. }
        ));
        assert_eq!(controller.state(), AcquisitionState::Aborted);
        drop(controller);
        assert_eq!(recorder.count(Operation::GetLambda), 1);
    }

    #[test]
    fn dropping_a_running_exposure_stops_it() {
        let driver = single_unit().with_poll_script([PollStep::NotReady]);
        let recorder = driver.recorder();
        let mut manager = connected(driver);
        {
            let mut controller = AcquisitionController::new(&mut manager).unwrap();
            let config = controller.configure(1.0).unwrap();
            controller.trigger(&config).unwrap();
        }
        assert_eq!(recorder.count(Operation::StopMeasure), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_exposure_completes_after_scripted_polls() {
        let driver = single_unit().with_pixels(64).with_poll_script([
            PollStep::NotReady,
            PollStep::NotReady,
            PollStep::Ready,
        ]);
        let recorder = driver.recorder();
        let mut manager = connected(driver);
        let mut controller = AcquisitionController::new(&mut manager).unwrap();
        let outcome = controller
            .run_exposure(0.1, &CancellationToken::new())
            .await
            .unwrap();
        let ExposureOutcome::Completed(measurement) = outcome else {
            panic!("expected a completed exposure");
        };
        assert_eq!(measurement.wavelength.len(), 64);
        assert_eq!(measurement.spectrum.len(), 64);
        drop(controller);
        assert_eq!(recorder.count(Operation::PollScan), 3);
        assert!(!recorder.called(Operation::StopMeasure));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_stops_measurement() {
        let code = AvsCode::from(AvsReturnCode::Timeout);
        let driver = single_unit().with_poll_script([PollStep::NotReady, PollStep::Fail(code)]);
        let recorder = driver.recorder();
        let mut manager = connected(driver);
        let mut controller = AcquisitionController::new(&mut manager).unwrap();
        let err = controller
            .run_exposure(1.0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Poll);
        assert_eq!(err.driver_code(), Some(code));
        drop(controller);
        assert_eq!(recorder.count(Operation::StopMeasure), 1);
    }
}
