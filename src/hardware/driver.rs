//! Capability boundary between the controller and the AvaSpec library.
//!
//! [`AvsDriver`] mirrors the subset of `libavs` the controller needs. Every
//! call is synchronous and takes `&mut self`: the library is not re-entrant,
//! and routing all calls through one exclusively-owned driver is what keeps
//! them sequential. Two implementations exist:
//!
//! - [`AvaspecDriver`](super::avaspec::AvaspecDriver): FFI binding to `libavs`
//!   (`avaspec_hardware` feature)
//! - [`MockAvsDriver`](super::mock::MockAvsDriver): scripted test double and
//!   simulation backend
//!
//! Return values follow the library: status-style calls return an [`AvsCode`]
//! (zero or positive is success), data-producing calls return
//! `Result<_, AvsCode>`.

use super::return_code::AvsCode;
use std::fmt;

/// USB status byte reported with each enumerated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatusCode {
    /// Status not reported.
    Unknown,
    /// Attached and free to activate.
    Available,
    /// Activated by this process.
    InUseBySelf,
    /// Activated by another process.
    InUseByOther,
    /// Any status that does not apply to a USB device (e.g. Ethernet states).
    Irrelevant,
}

impl DeviceStatusCode {
    /// Decode the `Status` byte of an `AvsIdentityType`.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Unknown,
            1 => Self::Available,
            2 => Self::InUseBySelf,
            3 => Self::InUseByOther,
            _ => Self::Irrelevant,
        }
    }
}

/// One enumerated physical unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Factory serial number, unique per unit.
    pub serial_number: String,
    /// User friendly name stored on the device.
    pub name: String,
    /// USB status at enumeration time.
    pub status: DeviceStatusCode,
}

impl DeviceIdentity {
    /// An available device.
    pub fn new(serial_number: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            name: name.into(),
            status: DeviceStatusCode::Available,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.serial_number, self.name, self.status)
    }
}

/// Opaque token returned by `AVS_Activate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(i64);

impl DeviceHandle {
    /// Sentinel handle value meaning activation failed.
    pub const INVALID: DeviceHandle = DeviceHandle(AvsCode::INVALID_HANDLE.0 as i64);

    /// Wrap the value returned by `AVS_Activate`.
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Value to pass back to the library.
    pub fn raw(self) -> i64 {
        self.0
    }

    /// A handle is usable when it is neither the invalid sentinel nor a
    /// negative error code.
    pub fn is_valid(self) -> bool {
        self != Self::INVALID && self.0 >= 0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Measurement parameters passed to `AVS_PrepareMeasure`.
///
/// Everything except the pixel range, integration time and averaging count
/// defaults to an inert value. Fields mirror `MeasConfigType`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureConfig {
    pub start_pixel: u16,
    pub stop_pixel: u16,
    /// Integration time in milliseconds.
    pub integration_time_ms: f32,
    pub integration_delay: u32,
    pub n_averages: u32,
    pub dark_correction_enable: u8,
    pub dark_correction_forget_percentage: u8,
    pub smooth_pixels: u16,
    pub smooth_model: u8,
    pub saturation_detection: u8,
    pub trigger_mode: u8,
    pub trigger_source: u8,
    pub trigger_source_type: u8,
    pub strobe_control: u16,
    pub laser_delay: u32,
    pub laser_width: u32,
    pub laser_wavelength: f32,
    pub store_to_ram: u16,
}

impl MeasureConfig {
    /// Number of scans requested per trigger.
    pub const N_SCANS: i16 = 1;

    /// Full-detector, single-average configuration for one integration.
    pub fn for_integration(n_pixels: usize, integration_time_ms: f32) -> Self {
        let stop_pixel = n_pixels.saturating_sub(1).min(u16::MAX as usize) as u16;
        Self {
            start_pixel: 0,
            stop_pixel,
            integration_time_ms,
            integration_delay: 0,
            n_averages: 1,
            dark_correction_enable: 0,
            dark_correction_forget_percentage: 0,
            smooth_pixels: 0,
            smooth_model: 0,
            saturation_detection: 0,
            trigger_mode: 0,
            trigger_source: 0,
            trigger_source_type: 0,
            strobe_control: 0,
            laser_delay: 0,
            laser_width: 0,
            laser_wavelength: 0.0,
            store_to_ram: 0,
        }
    }
}

/// Version strings reported by `AVS_GetVersionInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionInfo {
    /// FPGA version.
    pub fpga: String,
    /// Firmware version.
    pub firmware: String,
    /// `libavs` version.
    pub library: String,
}

/// The parts of the device configuration block the controller reads.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParameters {
    /// Detector size stored in the device configuration.
    pub n_pixels: u16,
    /// Thermistor polynomial (optical bench), lowest order first.
    pub temperature_fit: [f32; 5],
    /// TEC setpoint in degrees Celsius.
    pub temperature_setpoint: f32,
}

impl DeviceParameters {
    /// Evaluate the thermistor polynomial at an analog-input voltage.
    pub fn temperature_at(&self, voltage: f32) -> f64 {
        let x = f64::from(voltage);
        self.temperature_fit
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * x + f64::from(c))
    }
}

/// Vendor library operations used by the controller.
pub trait AvsDriver: Send {
    /// Open the library session. Returns the number of devices found, or an error.
    fn init(&mut self) -> AvsCode;

    /// Rescan the USB bus. Returns the number of attached devices.
    fn update_usb_devices(&mut self) -> AvsCode;

    /// List up to `max` attached devices.
    fn list(&mut self, max: usize) -> Result<Vec<DeviceIdentity>, AvsCode>;

    /// Activate a device. Failure is reported as [`DeviceHandle::INVALID`].
    fn activate(&mut self, identity: &DeviceIdentity) -> DeviceHandle;

    /// Release a handle. Returns `false` if the library refused.
    fn deactivate(&mut self, handle: DeviceHandle) -> bool;

    /// Close the library session.
    fn done(&mut self) -> AvsCode;

    fn num_pixels(&mut self, handle: DeviceHandle) -> Result<usize, AvsCode>;

    fn prepare_measure(&mut self, handle: DeviceHandle, config: &MeasureConfig) -> AvsCode;

    /// Start `n_scans` measurements.
    fn measure(&mut self, handle: DeviceHandle, n_scans: i16) -> AvsCode;

    /// One non-blocking completion query.
    fn poll_scan(&mut self, handle: DeviceHandle) -> Result<bool, AvsCode>;

    fn get_lambda(&mut self, handle: DeviceHandle, n_pixels: usize) -> Result<Vec<f64>, AvsCode>;

    fn get_scope_data(
        &mut self,
        handle: DeviceHandle,
        n_pixels: usize,
    ) -> Result<Vec<f64>, AvsCode>;

    fn stop_measure(&mut self, handle: DeviceHandle) -> AvsCode;

    fn version_info(&mut self, handle: DeviceHandle) -> Result<VersionInfo, AvsCode>;

    fn device_parameters(&mut self, handle: DeviceHandle) -> Result<DeviceParameters, AvsCode>;

    /// Read an analog input voltage.
    fn analog_in(&mut self, handle: DeviceHandle, input: u8) -> Result<f32, AvsCode>;
}

impl<D: AvsDriver + ?Sized> AvsDriver for Box<D> {
    fn init(&mut self) -> AvsCode {
        (**self).init()
    }
    fn update_usb_devices(&mut self) -> AvsCode {
        (**self).update_usb_devices()
    }
    fn list(&mut self, max: usize) -> Result<Vec<DeviceIdentity>, AvsCode> {
        (**self).list(max)
    }
    fn activate(&mut self, identity: &DeviceIdentity) -> DeviceHandle {
        (**self).activate(identity)
    }
    fn deactivate(&mut self, handle: DeviceHandle) -> bool {
        (**self).deactivate(handle)
    }
    fn done(&mut self) -> AvsCode {
        (**self).done()
    }
    fn num_pixels(&mut self, handle: DeviceHandle) -> Result<usize, AvsCode> {
        (**self).num_pixels(handle)
    }
    fn prepare_measure(&mut self, handle: DeviceHandle, config: &MeasureConfig) -> AvsCode {
        (**self).prepare_measure(handle, config)
    }
    fn measure(&mut self, handle: DeviceHandle, n_scans: i16) -> AvsCode {
        (**self).measure(handle, n_scans)
    }
    fn poll_scan(&mut self, handle: DeviceHandle) -> Result<bool, AvsCode> {
        (**self).poll_scan(handle)
    }
    fn get_lambda(&mut self, handle: DeviceHandle, n_pixels: usize) -> Result<Vec<f64>, AvsCode> {
        (**self).get_lambda(handle, n_pixels)
    }
    fn get_scope_data(
        &mut self,
        handle: DeviceHandle,
        n_pixels: usize,
    ) -> Result<Vec<f64>, AvsCode> {
        (**self).get_scope_data(handle, n_pixels)
    }
    fn stop_measure(&mut self, handle: DeviceHandle) -> AvsCode {
        (**self).stop_measure(handle)
    }
    fn version_info(&mut self, handle: DeviceHandle) -> Result<VersionInfo, AvsCode> {
        (**self).version_info(handle)
    }
    fn device_parameters(&mut self, handle: DeviceHandle) -> Result<DeviceParameters, AvsCode> {
        (**self).device_parameters(handle)
    }
    fn analog_in(&mut self, handle: DeviceHandle, input: u8) -> Result<f32, AvsCode> {
        (**self).analog_in(handle, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_config_covers_full_detector() {
        let config = MeasureConfig::for_integration(2048, 2500.0);
        assert_eq!(config.start_pixel, 0);
        assert_eq!(config.stop_pixel, 2047);
        assert_eq!(config.n_averages, 1);
        assert_eq!(config.integration_time_ms, 2500.0);
        assert_eq!(config.store_to_ram, 0);
    }

    #[test]
    fn invalid_handle_sentinel() {
        assert!(!DeviceHandle::INVALID.is_valid());
        assert_eq!(DeviceHandle::INVALID.raw(), 1000);
        assert!(!DeviceHandle::from_raw(-3).is_valid());
        assert!(DeviceHandle::from_raw(0).is_valid());
        assert!(DeviceHandle::from_raw(1).is_valid());
    }

    #[test]
    fn thermistor_polynomial_lowest_order_first() {
        let params = DeviceParameters {
            n_pixels: 2048,
            temperature_fit: [1.0, 2.0, 3.0, 0.0, 0.0],
            temperature_setpoint: 5.0,
        };
        // 1 + 2*2 + 3*4
        assert_eq!(params.temperature_at(2.0), 17.0);
    }

    #[test]
    fn status_byte_decoding() {
        assert_eq!(DeviceStatusCode::from_raw(1), DeviceStatusCode::Available);
        assert_eq!(DeviceStatusCode::from_raw(3), DeviceStatusCode::InUseByOther);
        assert_eq!(DeviceStatusCode::from_raw(7), DeviceStatusCode::Irrelevant);
    }
}
