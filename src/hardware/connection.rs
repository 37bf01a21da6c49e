//! Device enumeration, selection and lifecycle.
//!
//! `ConnectionManager` owns the driver and, once connected, the single active
//! device handle. Every connection attempt re-enumerates the USB bus; device
//! lists are returned as values and never cached process-wide.
//!
//! ## Teardown
//!
//! The library session and the device handle are released by [`disconnect`],
//! which is idempotent and never fails: a refused deactivation is logged and
//! the session is closed anyway. Dropping a manager runs the same teardown, so
//! a panic or an early return cannot leak the handle.
//!
//! [`disconnect`]: ConnectionManager::disconnect

use super::driver::{AvsDriver, DeviceHandle, DeviceIdentity, DeviceParameters};
use super::return_code::AvsCode;
use crate::error::{AppResult, SpectrographError};
use std::collections::BTreeSet;

/// Analog input wired to the optical bench thermistor.
const THERMISTOR_INPUT: u8 = 0;

/// The device currently held by a [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDevice {
    /// The enumerated unit that was activated.
    pub identity: DeviceIdentity,
    /// Handle returned by `AVS_Activate`.
    pub handle: DeviceHandle,
    /// Detector size read at activation.
    pub n_pixels: usize,
}

/// Snapshot of the connected spectrograph.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    /// Detector size.
    pub n_pixels: usize,
    /// FPGA version string.
    pub fpga_version: String,
    /// Firmware version string.
    pub firmware_version: String,
    /// `libavs` version string.
    pub library_version: String,
    /// Detector temperature setpoint (degC).
    pub temperature_setpoint: f64,
    /// Optical bench thermistor temperature (degC).
    pub temperature: f64,
    /// Raw configuration values, only with `status(true)`.
    pub parameters: Option<DeviceParameters>,
}

/// Owns the driver session and at most one activated device.
pub struct ConnectionManager<D: AvsDriver> {
    driver: D,
    session_open: bool,
    active: Option<ActiveDevice>,
}

impl<D: AvsDriver> ConnectionManager<D> {
    /// Wrap a driver without touching the hardware.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            session_open: false,
            active: None,
        }
    }

    /// Enumerate, select and connect in one step.
    pub fn open(driver: D, serial_number: Option<&str>) -> AppResult<Self> {
        let mut manager = Self::new(driver);
        let identities = manager.enumerate()?;
        let identity = Self::select(&identities, serial_number)?;
        manager.connect(&identity)?;
        Ok(manager)
    }

    /// List attached devices.
    ///
    /// Fails with `NoDevicesFound` when the USB rescan reports zero units,
    /// before the list itself is requested.
    pub fn enumerate(&mut self) -> AppResult<Vec<DeviceIdentity>> {
        self.ensure_session()?;

        let count = self.driver.update_usb_devices();
        if count.is_error() {
            return Err(SpectrographError::EnumerationFailed { code: count });
        }
        let n_devices = usize::try_from(count.raw()).unwrap_or(0);
        if n_devices == 0 {
            return Err(SpectrographError::NoDevicesFound);
        }
        tracing::debug!(n_devices, "Found attached USB AvaSpec device(s)");

        let identities = self
            .driver
            .list(n_devices)
            .map_err(|code| SpectrographError::EnumerationFailed { code })?;
        tracing::debug!(devices = ?identities, "Enumerated devices");
        Ok(identities)
    }

    /// Pick one identity from an enumeration.
    ///
    /// The result depends only on the set of serial numbers, never on their
    /// order: candidate lists in errors are sorted.
    pub fn select(
        identities: &[DeviceIdentity],
        serial_number: Option<&str>,
    ) -> AppResult<DeviceIdentity> {
        let mut seen = BTreeSet::new();
        for identity in identities {
            if !seen.insert(identity.serial_number.as_str()) {
                return Err(SpectrographError::DuplicateSerialNumber {
                    serial_number: identity.serial_number.clone(),
                });
            }
        }
        let serials: Vec<String> = seen.into_iter().map(str::to_owned).collect();

        match serial_number {
            Some(wanted) => identities
                .iter()
                .find(|identity| identity.serial_number == wanted)
                .cloned()
                .ok_or_else(|| SpectrographError::DeviceNotFound {
                    serial_number: wanted.to_owned(),
                    available: serials,
                }),
            None => match identities {
                [] => Err(SpectrographError::NoDevicesFound),
                [only] => Ok(only.clone()),
                _ => Err(SpectrographError::AmbiguousDevice {
                    candidates: serials,
                }),
            },
        }
    }

    /// Activate `identity` and read its detector size.
    ///
    /// Any previously active handle is released first.
    pub fn connect(&mut self, identity: &DeviceIdentity) -> AppResult<DeviceHandle> {
        self.ensure_session()?;
        self.release_handle();

        let handle = self.driver.activate(identity);
        if !handle.is_valid() {
            let code = AvsCode(i32::try_from(handle.raw()).unwrap_or(i32::MIN));
            return Err(SpectrographError::ActivationFailed {
                serial_number: identity.serial_number.clone(),
                code,
            });
        }

        let n_pixels = match self.driver.num_pixels(handle) {
            Ok(n) => n,
            Err(code) => {
                if !self.driver.deactivate(handle) {
                    tracing::error!(%handle, serial = %identity.serial_number, "Could not deactivate device after failed pixel query");
                }
                return Err(SpectrographError::StatusFailed {
                    what: "GetNumPixels",
                    code,
                });
            }
        };

        tracing::info!(
            %handle,
            serial = %identity.serial_number,
            n_pixels,
            "Activated connection with USB device"
        );
        self.active = Some(ActiveDevice {
            identity: identity.clone(),
            handle,
            n_pixels,
        });
        Ok(handle)
    }

    /// Release the handle (if any) and close the library session (if open).
    ///
    /// Never fails; calling it again, or without a connection, does nothing.
    pub fn disconnect(&mut self) {
        self.release_handle();
        if self.session_open {
            let code = self.driver.done();
            if code.is_error() {
                tracing::warn!(%code, "Closing the AvaSpec library session reported an error");
            }
            self.session_open = false;
            tracing::debug!("AvaSpec library session closed");
        }
    }

    /// Read versions, temperatures and detector size from the active device.
    pub fn status(&mut self, full: bool) -> AppResult<DeviceStatus> {
        let handle = self.active()?.handle;

        let versions = self
            .driver
            .version_info(handle)
            .map_err(|code| SpectrographError::StatusFailed {
                what: "GetVersionInfo",
                code,
            })?;
        let parameters = self.driver.device_parameters(handle).map_err(|code| {
            SpectrographError::StatusFailed {
                what: "GetParameter",
                code,
            }
        })?;
        let voltage = self
            .driver
            .analog_in(handle, THERMISTOR_INPUT)
            .map_err(|code| SpectrographError::StatusFailed {
                what: "GetAnalogIn",
                code,
            })?;

        Ok(DeviceStatus {
            n_pixels: usize::from(parameters.n_pixels),
            fpga_version: versions.fpga,
            firmware_version: versions.firmware,
            library_version: versions.library,
            temperature_setpoint: f64::from(parameters.temperature_setpoint),
            temperature: parameters.temperature_at(voltage),
            parameters: full.then_some(parameters),
        })
    }

    /// The active device, or `NotConnected`.
    pub fn active(&self) -> AppResult<&ActiveDevice> {
        self.active.as_ref().ok_or(SpectrographError::NotConnected)
    }

    /// A device is activated.
    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    pub(crate) fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn ensure_session(&mut self) -> AppResult<()> {
        if self.session_open {
            return Ok(());
        }
        let code = self.driver.init();
        if code.is_error() {
            return Err(SpectrographError::EnumerationFailed { code });
        }
        self.session_open = true;
        Ok(())
    }

    fn release_handle(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        if active.handle == DeviceHandle::INVALID {
            return;
        }
        if self.driver.deactivate(active.handle) {
            tracing::info!(handle = %active.handle, serial = %active.identity.serial_number, "Deactivated device");
        } else {
            tracing::error!(
                handle = %active.handle,
                serial = %active.identity.serial_number,
                "Could not deactivate device; assuming it is safe to close the session anyway"
            );
        }
    }
}

impl<D: AvsDriver> Drop for ConnectionManager<D> {
    fn drop(&mut self) {
        if self.active.is_some() || self.session_open {
            tracing::debug!("ConnectionManager dropped with open session, disconnecting");
            self.disconnect();
        }
    }
}
