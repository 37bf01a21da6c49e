//! `libavs` binding for real hardware.
//!
//! Thin safe wrapper over `avaspec-sys`. Every method is one library call plus
//! buffer management; no policy lives here. The library keeps process-wide
//! state, so only one `AvaspecDriver` should have an open session at a time.

use super::driver::{
    AvsDriver, DeviceHandle, DeviceIdentity, DeviceParameters, DeviceStatusCode, MeasureConfig,
    VersionInfo,
};
use super::return_code::AvsCode;
use avaspec_sys::*;
use std::os::raw::{c_char, c_long, c_uchar, c_uint, c_ushort};

/// Driver backed by the vendor shared library.
#[derive(Debug, Default)]
pub struct AvaspecDriver {
    /// Raw identities from the last `list`, needed by `AVS_Activate`.
    identities: Vec<AvsIdentityType>,
}

impl AvaspecDriver {
    /// A driver with no library session yet.
    pub fn new() -> Self {
        Self::default()
    }
}

fn decode_c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn chars_to_bytes(chars: &[c_char]) -> Vec<u8> {
    chars.iter().map(|&c| c as u8).collect()
}

fn to_raw_handle(handle: DeviceHandle) -> c_long {
    handle.raw() as c_long
}

fn identity_from_raw(raw: &AvsIdentityType) -> DeviceIdentity {
    // Copy out of the packed struct before borrowing.
    let serial = raw.SerialNumber;
    let name = raw.UserFriendlyName;
    let status = raw.Status;
    DeviceIdentity {
        serial_number: decode_c_string(&chars_to_bytes(&serial)),
        name: decode_c_string(&chars_to_bytes(&name)),
        status: DeviceStatusCode::from_raw(status),
    }
}

fn meas_config_to_raw(config: &MeasureConfig) -> MeasConfigType {
    MeasConfigType {
        m_StartPixel: config.start_pixel,
        m_StopPixel: config.stop_pixel,
        m_IntegrationTime: config.integration_time_ms,
        m_IntegrationDelay: config.integration_delay,
        m_NrAverages: config.n_averages,
        m_CorDynDark_m_Enable: config.dark_correction_enable,
        m_CorDynDark_m_ForgetPercentage: config.dark_correction_forget_percentage,
        m_Smoothing_m_SmoothPix: config.smooth_pixels,
        m_Smoothing_m_SmoothModel: config.smooth_model,
        m_SaturationDetection: config.saturation_detection,
        m_Trigger_m_Mode: config.trigger_mode,
        m_Trigger_m_Source: config.trigger_source,
        m_Trigger_m_SourceType: config.trigger_source_type,
        m_Control_m_StrobeControl: config.strobe_control,
        m_Control_m_LaserDelay: config.laser_delay,
        m_Control_m_LaserWidth: config.laser_width,
        m_Control_m_LaserWaveLength: config.laser_wavelength,
        m_Control_m_StoreToRam: config.store_to_ram,
    }
}

#[allow(unsafe_code)]
impl AvsDriver for AvaspecDriver {
    fn init(&mut self) -> AvsCode {
        // SAFETY: port 0 selects the USB subsystem; no pointers involved.
        AvsCode(unsafe { AVS_Init(0) })
    }

    fn update_usb_devices(&mut self) -> AvsCode {
        // SAFETY: no arguments; library session opened by init.
        AvsCode(unsafe { AVS_UpdateUSBDevices() })
    }

    fn list(&mut self, max: usize) -> Result<Vec<DeviceIdentity>, AvsCode> {
        let mut raw = vec![AvsIdentityType::default(); max];
        let list_size = (max * std::mem::size_of::<AvsIdentityType>()) as c_uint;
        let mut required: c_uint = list_size;
        // SAFETY: `raw` holds `max` identities, matching `list_size` bytes.
        let code = AvsCode(unsafe { AVS_GetList(list_size, &mut required, raw.as_mut_ptr()) });
        code.check()?;
        raw.truncate(usize::try_from(code.raw()).unwrap_or(0).min(max));
        let identities = raw.iter().map(identity_from_raw).collect();
        self.identities = raw;
        Ok(identities)
    }

    fn activate(&mut self, identity: &DeviceIdentity) -> DeviceHandle {
        let Some(raw) = self
            .identities
            .iter_mut()
            .find(|raw| identity_from_raw(raw).serial_number == identity.serial_number)
        else {
            return DeviceHandle::INVALID;
        };
        // SAFETY: `raw` is an identity previously filled in by AVS_GetList.
        let handle = unsafe { AVS_Activate(raw) };
        DeviceHandle::from_raw(i64::from(handle))
    }

    fn deactivate(&mut self, handle: DeviceHandle) -> bool {
        // SAFETY: handle value only; the library validates it.
        unsafe { AVS_Deactivate(to_raw_handle(handle)) }
    }

    fn done(&mut self) -> AvsCode {
        self.identities.clear();
        // SAFETY: closes the library session; safe to call repeatedly.
        AvsCode(unsafe { AVS_Done() })
    }

    fn num_pixels(&mut self, handle: DeviceHandle) -> Result<usize, AvsCode> {
        let mut n_pixels: c_ushort = 0;
        // SAFETY: `n_pixels` is a valid out pointer.
        AvsCode(unsafe { AVS_GetNumPixels(to_raw_handle(handle), &mut n_pixels) }).check()?;
        Ok(usize::from(n_pixels))
    }

    fn prepare_measure(&mut self, handle: DeviceHandle, config: &MeasureConfig) -> AvsCode {
        let mut raw = meas_config_to_raw(config);
        // SAFETY: `raw` is a fully initialised packed MeasConfigType.
        AvsCode(unsafe { AVS_PrepareMeasure(to_raw_handle(handle), &mut raw) })
    }

    fn measure(&mut self, handle: DeviceHandle, n_scans: i16) -> AvsCode {
        // SAFETY: a null window handle selects polling mode.
        AvsCode(unsafe { AVS_Measure(to_raw_handle(handle), std::ptr::null_mut(), n_scans) })
    }

    fn poll_scan(&mut self, handle: DeviceHandle) -> Result<bool, AvsCode> {
        // SAFETY: handle value only.
        let code = AvsCode(unsafe { AVS_PollScan(to_raw_handle(handle)) });
        code.check()?;
        Ok(code.raw() == 1)
    }

    fn get_lambda(&mut self, handle: DeviceHandle, n_pixels: usize) -> Result<Vec<f64>, AvsCode> {
        let mut wavelength = vec![0.0f64; n_pixels.max(MAX_NR_PIXELS)];
        // SAFETY: buffer holds MAX_NR_PIXELS doubles, the most the library writes.
        AvsCode(unsafe { AVS_GetLambda(to_raw_handle(handle), wavelength.as_mut_ptr()) })
            .check()?;
        wavelength.truncate(n_pixels);
        Ok(wavelength)
    }

    fn get_scope_data(
        &mut self,
        handle: DeviceHandle,
        n_pixels: usize,
    ) -> Result<Vec<f64>, AvsCode> {
        let mut time_label: c_uint = 0;
        let mut spectrum = vec![0.0f64; n_pixels.max(MAX_NR_PIXELS)];
        // SAFETY: buffer holds MAX_NR_PIXELS doubles; `time_label` is a valid out pointer.
        AvsCode(unsafe {
            AVS_GetScopeData(
                to_raw_handle(handle),
                &mut time_label,
                spectrum.as_mut_ptr(),
            )
        })
        .check()?;
        spectrum.truncate(n_pixels);
        Ok(spectrum)
    }

    fn stop_measure(&mut self, handle: DeviceHandle) -> AvsCode {
        // SAFETY: handle value only.
        AvsCode(unsafe { AVS_StopMeasure(to_raw_handle(handle)) })
    }

    fn version_info(&mut self, handle: DeviceHandle) -> Result<VersionInfo, AvsCode> {
        let mut fpga = [0 as c_uchar; VERSION_LEN];
        let mut firmware = [0 as c_uchar; VERSION_LEN];
        let mut library = [0 as c_uchar; VERSION_LEN];
        // SAFETY: each buffer is VERSION_LEN bytes as the library requires.
        AvsCode(unsafe {
            AVS_GetVersionInfo(
                to_raw_handle(handle),
                fpga.as_mut_ptr(),
                firmware.as_mut_ptr(),
                library.as_mut_ptr(),
            )
        })
        .check()?;
        Ok(VersionInfo {
            fpga: decode_c_string(&fpga),
            firmware: decode_c_string(&firmware),
            library: decode_c_string(&library),
        })
    }

    fn device_parameters(&mut self, handle: DeviceHandle) -> Result<DeviceParameters, AvsCode> {
        let mut config = DeviceConfigType::zeroed();
        let size = std::mem::size_of::<DeviceConfigType>() as c_uint;
        let mut required: c_uint = size;
        // SAFETY: `config` is a heap allocation of exactly `size` bytes.
        AvsCode(unsafe {
            AVS_GetParameter(to_raw_handle(handle), size, &mut required, &mut *config)
        })
        .check()?;
        Ok(DeviceParameters {
            n_pixels: config.m_Detector_m_NrPixels,
            temperature_fit: config.m_Temperature_3_m_aFit,
            temperature_setpoint: config.m_TecControl_m_Setpoint,
        })
    }

    fn analog_in(&mut self, handle: DeviceHandle, input: u8) -> Result<f32, AvsCode> {
        let mut voltage: f32 = 0.0;
        // SAFETY: `voltage` is a valid out pointer.
        AvsCode(unsafe { AVS_GetAnalogIn(to_raw_handle(handle), input, &mut voltage) })
            .check()?;
        Ok(voltage)
    }
}
