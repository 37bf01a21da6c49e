//! In-process AvaSpec double.
//!
//! `MockAvsDriver` backs both the test suite and the CLI's `--simulate` mode.
//! It keeps a log of every library call, replays a scripted sequence of poll
//! results, and injects driver error codes per operation.
//!
//! State lives behind an `Arc<Mutex<_>>` so a [`MockRecorder`] obtained before the
//! driver is moved into a [`ConnectionManager`](super::connection::ConnectionManager)
//! can still inspect what happened.
//!
//! # Example
//!
//! ```rust,ignore
//! let driver = MockAvsDriver::new(vec![DeviceIdentity::new("A", "unit A")])
//!     .with_poll_script([PollStep::NotReady, PollStep::Ready]);
//! let recorder = driver.recorder();
//! // ... run an exposure ...
//! assert_eq!(recorder.count(Operation::PollScan), 2);
//! ```

use super::driver::{
    AvsDriver, DeviceHandle, DeviceIdentity, DeviceParameters, MeasureConfig, VersionInfo,
};
use super::return_code::{AvsCode, AvsReturnCode};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};

/// Default detector size of the simulated unit.
pub const SIM_PIXELS: usize = 2048;
/// Wavelength range covered by the simulated detector, in nm.
pub const SIM_WAVELENGTH_RANGE: (f64, f64) = (300.0, 1100.0);

/// Library entry points, as recorded in the call log.
///
/// Variants are named after the `AVS_*` functions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Init,
    UpdateUsbDevices,
    List,
    Activate,
    Deactivate,
    Done,
    NumPixels,
    PrepareMeasure,
    Measure,
    PollScan,
    GetLambda,
    GetScopeData,
    StopMeasure,
    VersionInfo,
    DeviceParameters,
    AnalogIn,
}

/// One recorded library call, with the arguments worth asserting on.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Init,
    UpdateUsbDevices,
    List { max: usize },
    Activate { serial_number: String },
    Deactivate { handle: DeviceHandle },
    Done,
    NumPixels,
    PrepareMeasure { config: MeasureConfig },
    Measure { n_scans: i16 },
    PollScan,
    GetLambda { n_pixels: usize },
    GetScopeData { n_pixels: usize },
    StopMeasure,
    VersionInfo,
    DeviceParameters,
    AnalogIn { input: u8 },
}

impl MockCall {
    /// The entry point this call went to.
    pub fn operation(&self) -> Operation {
        match self {
            MockCall::Init => Operation::Init,
            MockCall::UpdateUsbDevices => Operation::UpdateUsbDevices,
            MockCall::List { .. } => Operation::List,
            MockCall::Activate { .. } => Operation::Activate,
            MockCall::Deactivate { .. } => Operation::Deactivate,
            MockCall::Done => Operation::Done,
            MockCall::NumPixels => Operation::NumPixels,
            MockCall::PrepareMeasure { .. } => Operation::PrepareMeasure,
            MockCall::Measure { .. } => Operation::Measure,
            MockCall::PollScan => Operation::PollScan,
            MockCall::GetLambda { .. } => Operation::GetLambda,
            MockCall::GetScopeData { .. } => Operation::GetScopeData,
            MockCall::StopMeasure => Operation::StopMeasure,
            MockCall::VersionInfo => Operation::VersionInfo,
            MockCall::DeviceParameters => Operation::DeviceParameters,
            MockCall::AnalogIn { .. } => Operation::AnalogIn,
        }
    }
}

/// One scripted `PollScan` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Scan still integrating.
    NotReady,
    /// Scan data available.
    Ready,
    /// `PollScan` itself fails.
    Fail(AvsCode),
}

/// A failure to inject into the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorScenario {
    /// Every call of `operation` fails with `code`.
    Always { operation: Operation, code: AvsCode },
    /// The first `count` calls of `operation` succeed, later ones fail.
    FailAfterN {
        operation: Operation,
        count: u32,
        code: AvsCode,
    },
}

/// Error injection configuration for the mock driver.
#[derive(Debug, Clone, Default)]
pub struct ErrorConfig {
    scenarios: Vec<ErrorScenario>,
    operation_counts: HashMap<Operation, u32>,
}

impl ErrorConfig {
    /// No injected failures.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single injected failure.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several injected failures, checked in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            scenarios,
            operation_counts: HashMap::new(),
        }
    }

    /// Count the call and return the injected code, if any.
    fn check_operation(&mut self, operation: Operation) -> Result<(), AvsCode> {
        let current = self.operation_counts.entry(operation).or_insert(0);
        *current += 1;
        let calls = *current;

        for scenario in &self.scenarios {
            match scenario {
                ErrorScenario::Always { operation: op, code } if *op == operation => {
                    return Err(*code);
                }
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                    code,
                } if *op == operation && calls > *count => {
                    return Err(*code);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MockState {
    devices: Vec<DeviceIdentity>,
    /// Overrides the count reported by `update_usb_devices`.
    reported_count: Option<usize>,
    n_pixels: usize,
    version: VersionInfo,
    temperature_fit: [f32; 5],
    temperature_setpoint: f32,
    thermistor_voltage: f32,
    deactivate_result: bool,
    errors: ErrorConfig,
    poll_script: VecDeque<PollStep>,
    calls: Vec<MockCall>,
    next_handle: i64,
    active: HashMap<DeviceHandle, String>,
    integration: Option<Duration>,
    measure_started: Option<Instant>,
}

/// Scripted AvaSpec driver.
#[derive(Debug, Clone)]
pub struct MockAvsDriver {
    state: Arc<Mutex<MockState>>,
}

/// Read-only view of a [`MockAvsDriver`]'s call log.
#[derive(Debug, Clone)]
pub struct MockRecorder {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockAvsDriver {
    /// A driver reporting exactly `devices`, with simulator defaults otherwise.
    pub fn new(devices: Vec<DeviceIdentity>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                devices,
                reported_count: None,
                n_pixels: SIM_PIXELS,
                version: VersionInfo {
                    fpga: "SIM-FPGA-1.0".into(),
                    firmware: "SIM-FW-1.0".into(),
                    library: "SIM-0.2.0".into(),
                },
                // 10 degC per volt above -20 degC
                temperature_fit: [-20.0, 10.0, 0.0, 0.0, 0.0],
                temperature_setpoint: 5.0,
                thermistor_voltage: 2.5,
                deactivate_result: true,
                errors: ErrorConfig::none(),
                poll_script: VecDeque::new(),
                calls: Vec::new(),
                next_handle: 1,
                active: HashMap::new(),
                integration: None,
                measure_started: None,
            })),
        }
    }

    /// Simulation backend with a single attached unit.
    pub fn simulator(serial_number: &str, name: &str) -> Self {
        Self::new(vec![DeviceIdentity::new(serial_number, name)])
    }

    /// Detector size reported by `GetNumPixels`.
    pub fn with_pixels(self, n_pixels: usize) -> Self {
        lock(&self.state).n_pixels = n_pixels;
        self
    }

    /// Replay `steps` for successive `PollScan` calls.
    ///
    /// Once the script runs out, polls report ready when the configured
    /// integration time has elapsed since `Measure`.
    pub fn with_poll_script(self, steps: impl IntoIterator<Item = PollStep>) -> Self {
        lock(&self.state).poll_script = steps.into_iter().collect();
        self
    }

    /// Inject library failures.
    pub fn with_errors(self, errors: ErrorConfig) -> Self {
        lock(&self.state).errors = errors;
        self
    }

    /// Result reported by `AVS_Deactivate`.
    pub fn with_deactivate_result(self, ok: bool) -> Self {
        lock(&self.state).deactivate_result = ok;
        self
    }

    /// Device count reported by the USB rescan, independent of the list.
    pub fn with_reported_count(self, count: usize) -> Self {
        lock(&self.state).reported_count = Some(count);
        self
    }

    /// TEC setpoint, thermistor polynomial and analog input voltage.
    pub fn with_temperature(self, setpoint: f32, fit: [f32; 5], voltage: f32) -> Self {
        {
            let mut state = lock(&self.state);
            state.temperature_setpoint = setpoint;
            state.temperature_fit = fit;
            state.thermistor_voltage = voltage;
        }
        self
    }

    /// A handle on the call log that outlives moving the driver.
    pub fn recorder(&self) -> MockRecorder {
        MockRecorder {
            state: Arc::clone(&self.state),
        }
    }

    /// Linear wavelength grid of the simulated detector.
    pub fn wavelengths(n_pixels: usize) -> Vec<f64> {
        let (lo, hi) = SIM_WAVELENGTH_RANGE;
        if n_pixels < 2 {
            return vec![lo; n_pixels];
        }
        let step = (hi - lo) / (n_pixels - 1) as f64;
        (0..n_pixels).map(|i| lo + step * i as f64).collect()
    }

    /// Synthetic spectrum: flat continuum plus an H-alpha line, scaled by exposure time.
    pub fn spectrum(wavelengths: &[f64], integration_ms: f64) -> Vec<f64> {
        let scale = integration_ms / 1000.0;
        wavelengths
            .iter()
            .map(|&lambda| {
                let line = 4000.0 * (-((lambda - 656.3) / 1.5).powi(2)).exp();
                (1000.0 + line) * scale
            })
            .collect()
    }
}

impl MockState {
    fn record(&mut self, call: MockCall) -> Result<(), AvsCode> {
        let operation = call.operation();
        self.calls.push(call);
        self.errors.check_operation(operation)
    }

    fn require_active(&self, handle: DeviceHandle) -> Result<(), AvsCode> {
        if self.active.contains_key(&handle) {
            Ok(())
        } else {
            Err(AvsReturnCode::InvalidDeviceId.into())
        }
    }

    fn check_length(&self, n_pixels: usize) -> Result<(), AvsCode> {
        if n_pixels < self.n_pixels {
            Err(AvsReturnCode::InvalidSize.into())
        } else {
            Ok(())
        }
    }
}

fn status(result: Result<(), AvsCode>) -> AvsCode {
    match result {
        Ok(()) => AvsCode::SUCCESS,
        Err(code) => code,
    }
}

impl AvsDriver for MockAvsDriver {
    fn init(&mut self) -> AvsCode {
        let mut state = lock(&self.state);
        status(state.record(MockCall::Init))
    }

    fn update_usb_devices(&mut self) -> AvsCode {
        let mut state = lock(&self.state);
        if let Err(code) = state.record(MockCall::UpdateUsbDevices) {
            return code;
        }
        let count = state.reported_count.unwrap_or(state.devices.len());
        AvsCode(i32::try_from(count).unwrap_or(i32::MAX))
    }

    fn list(&mut self, max: usize) -> Result<Vec<DeviceIdentity>, AvsCode> {
        let mut state = lock(&self.state);
        state.record(MockCall::List { max })?;
        if state.devices.len() > max {
            return Err(AvsReturnCode::InvalidSize.into());
        }
        Ok(state.devices.clone())
    }

    fn activate(&mut self, identity: &DeviceIdentity) -> DeviceHandle {
        let mut state = lock(&self.state);
        let call = MockCall::Activate {
            serial_number: identity.serial_number.clone(),
        };
        if state.record(call).is_err() {
            return DeviceHandle::INVALID;
        }
        if !state
            .devices
            .iter()
            .any(|d| d.serial_number == identity.serial_number)
        {
            return DeviceHandle::INVALID;
        }
        let handle = DeviceHandle::from_raw(state.next_handle);
        state.next_handle += 1;
        state.active.insert(handle, identity.serial_number.clone());
        handle
    }

    fn deactivate(&mut self, handle: DeviceHandle) -> bool {
        let mut state = lock(&self.state);
        if state.record(MockCall::Deactivate { handle }).is_err() {
            return false;
        }
        if !state.deactivate_result {
            return false;
        }
        state.active.remove(&handle).is_some()
    }

    fn done(&mut self) -> AvsCode {
        let mut state = lock(&self.state);
        let result = state.record(MockCall::Done);
        state.active.clear();
        status(result)
    }

    fn num_pixels(&mut self, handle: DeviceHandle) -> Result<usize, AvsCode> {
        let mut state = lock(&self.state);
        state.record(MockCall::NumPixels)?;
        state.require_active(handle)?;
        Ok(state.n_pixels)
    }

    fn prepare_measure(&mut self, handle: DeviceHandle, config: &MeasureConfig) -> AvsCode {
        let mut state = lock(&self.state);
        let call = MockCall::PrepareMeasure {
            config: config.clone(),
        };
        status(state.record(call).and_then(|()| {
            state.require_active(handle)?;
            if usize::from(config.stop_pixel) >= state.n_pixels
                || config.start_pixel > config.stop_pixel
            {
                return Err(AvsReturnCode::InvalidPixelRange.into());
            }
            if !(config.integration_time_ms > 0.0) {
                return Err(AvsReturnCode::InvalidIntTime.into());
            }
            state.integration = Some(Duration::from_secs_f64(
                f64::from(config.integration_time_ms) / 1000.0,
            ));
            Ok(())
        }))
    }

    fn measure(&mut self, handle: DeviceHandle, n_scans: i16) -> AvsCode {
        let mut state = lock(&self.state);
        status(state.record(MockCall::Measure { n_scans }).and_then(|()| {
            state.require_active(handle)?;
            if state.integration.is_none() {
                return Err(AvsReturnCode::InvalidState.into());
            }
            state.measure_started = Some(Instant::now());
            Ok(())
        }))
    }

    fn poll_scan(&mut self, handle: DeviceHandle) -> Result<bool, AvsCode> {
        let mut state = lock(&self.state);
        state.record(MockCall::PollScan)?;
        state.require_active(handle)?;
        let Some(started) = state.measure_started else {
            return Err(AvsReturnCode::InvalidState.into());
        };
        match state.poll_script.pop_front() {
            Some(PollStep::Ready) => Ok(true),
            Some(PollStep::NotReady) => Ok(false),
            Some(PollStep::Fail(code)) => Err(code),
            None => {
                let integration = state.integration.unwrap_or_default();
                Ok(Instant::now() >= started + integration)
            }
        }
    }

    fn get_lambda(&mut self, handle: DeviceHandle, n_pixels: usize) -> Result<Vec<f64>, AvsCode> {
        let mut state = lock(&self.state);
        state.record(MockCall::GetLambda { n_pixels })?;
        state.require_active(handle)?;
        state.check_length(n_pixels)?;
        Ok(Self::wavelengths(state.n_pixels))
    }

    fn get_scope_data(
        &mut self,
        handle: DeviceHandle,
        n_pixels: usize,
    ) -> Result<Vec<f64>, AvsCode> {
        let mut state = lock(&self.state);
        state.record(MockCall::GetScopeData { n_pixels })?;
        state.require_active(handle)?;
        state.check_length(n_pixels)?;
        if state.measure_started.take().is_none() {
            return Err(AvsReturnCode::InvalidMeasData.into());
        }
        let integration_ms = state
            .integration
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or_default();
        let lambda = Self::wavelengths(state.n_pixels);
        Ok(Self::spectrum(&lambda, integration_ms))
    }

    fn stop_measure(&mut self, handle: DeviceHandle) -> AvsCode {
        let mut state = lock(&self.state);
        status(state.record(MockCall::StopMeasure).and_then(|()| {
            state.require_active(handle)?;
            state.measure_started = None;
            state.poll_script.clear();
            Ok(())
        }))
    }

    fn version_info(&mut self, handle: DeviceHandle) -> Result<VersionInfo, AvsCode> {
        let mut state = lock(&self.state);
        state.record(MockCall::VersionInfo)?;
        state.require_active(handle)?;
        Ok(state.version.clone())
    }

    fn device_parameters(&mut self, handle: DeviceHandle) -> Result<DeviceParameters, AvsCode> {
        let mut state = lock(&self.state);
        state.record(MockCall::DeviceParameters)?;
        state.require_active(handle)?;
        Ok(DeviceParameters {
            n_pixels: u16::try_from(state.n_pixels).unwrap_or(u16::MAX),
            temperature_fit: state.temperature_fit,
            temperature_setpoint: state.temperature_setpoint,
        })
    }

    fn analog_in(&mut self, handle: DeviceHandle, input: u8) -> Result<f32, AvsCode> {
        let mut state = lock(&self.state);
        state.record(MockCall::AnalogIn { input })?;
        state.require_active(handle)?;
        Ok(if input == 0 {
            state.thermistor_voltage
        } else {
            0.0
        })
    }
}

impl MockRecorder {
    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    /// Calls made so far, reduced to their operation.
    pub fn operations(&self) -> Vec<Operation> {
        lock(&self.state)
            .calls
            .iter()
            .map(MockCall::operation)
            .collect()
    }

    /// How often `operation` was called.
    pub fn count(&self, operation: Operation) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    /// `operation` was called at least once.
    pub fn called(&self, operation: Operation) -> bool {
        self.count(operation) > 0
    }

    /// Number of handles the mock still considers active.
    pub fn active_handles(&self) -> usize {
        lock(&self.state).active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(serial: &str) -> DeviceIdentity {
        DeviceIdentity::new(serial, format!("unit {serial}"))
    }

    #[test]
    fn records_calls_in_order() {
        let mut driver = MockAvsDriver::new(vec![unit("A")]);
        let recorder = driver.recorder();
        driver.init();
        assert_eq!(driver.update_usb_devices(), AvsCode(1));
        let devices = driver.list(1).unwrap();
        let handle = driver.activate(&devices[0]);
        assert!(handle.is_valid());
        assert!(driver.deactivate(handle));
        driver.done();
        assert_eq!(
            recorder.operations(),
            vec![
                Operation::Init,
                Operation::UpdateUsbDevices,
                Operation::List,
                Operation::Activate,
                Operation::Deactivate,
                Operation::Done,
            ]
        );
    }

    #[test]
    fn fail_after_n_lets_early_calls_through() {
        let code = AvsCode::from(AvsReturnCode::Communication);
        let mut driver = MockAvsDriver::new(vec![unit("A")]).with_errors(ErrorConfig::scenario(
            ErrorScenario::FailAfterN {
                operation: Operation::UpdateUsbDevices,
                count: 1,
                code,
            },
        ));
        assert_eq!(driver.update_usb_devices(), AvsCode(1));
        assert_eq!(driver.update_usb_devices(), code);
    }

    #[test]
    fn injected_activation_failure_returns_invalid_handle() {
        let mut driver =
            MockAvsDriver::new(vec![unit("A")]).with_errors(ErrorConfig::scenario(
                ErrorScenario::Always {
                    operation: Operation::Activate,
                    code: AvsCode::INVALID_HANDLE,
                },
            ));
        assert_eq!(driver.activate(&unit("A")), DeviceHandle::INVALID);
    }

    #[test]
    fn poll_script_then_elapsed_time() {
        let mut driver = MockAvsDriver::new(vec![unit("A")])
            .with_pixels(16)
            .with_poll_script([PollStep::NotReady, PollStep::Ready]);
        let handle = driver.activate(&unit("A"));
        let config = MeasureConfig::for_integration(16, 1.0);
        assert_eq!(driver.prepare_measure(handle, &config), AvsCode::SUCCESS);
        assert_eq!(driver.measure(handle, 1), AvsCode::SUCCESS);
        assert_eq!(driver.poll_scan(handle), Ok(false));
        assert_eq!(driver.poll_scan(handle), Ok(true));
        let spectrum = driver.get_scope_data(handle, 16).unwrap();
        assert_eq!(spectrum.len(), 16);
    }

    #[test]
    fn short_buffer_is_invalid_size() {
        let mut driver = MockAvsDriver::new(vec![unit("A")]).with_pixels(32);
        let handle = driver.activate(&unit("A"));
        assert_eq!(
            driver.get_lambda(handle, 16),
            Err(AvsReturnCode::InvalidSize.into())
        );
    }

    #[test]
    fn simulated_wavelength_grid_spans_range() {
        let lambda = MockAvsDriver::wavelengths(SIM_PIXELS);
        assert_eq!(lambda.len(), SIM_PIXELS);
        assert_eq!(lambda[0], 300.0);
        assert!((lambda[SIM_PIXELS - 1] - 1100.0).abs() < 1e-9);
    }
}
