//! Raw FFI bindings for the Avantes AvaSpec Linux library (`libavs`).
//!
//! Only the subset of the API used by `fiber_spectrograph` is declared. The
//! struct layouts follow `avaspec.h` (library version 0.2.0): every struct is
//! byte-packed, so fields must be read by value, never by reference.
//!
//! The functions are only available with the `avaspec-sdk` feature, which
//! links against `libavs`. The types and constants are always available so the
//! safe wrapper can be type-checked on machines without the vendor library.

#![allow(non_camel_case_types, non_snake_case, missing_docs)]

use std::os::raw::{c_char, c_int, c_long, c_short, c_uchar, c_uint, c_ushort, c_void};

/// Length of the serial number field of [`AvsIdentityType`].
pub const AVS_SERIAL_LEN: usize = 10;
/// Length of the user friendly name field of [`AvsIdentityType`].
pub const USER_ID_LEN: usize = 64;
/// Length of the version strings returned by `AVS_GetVersionInfo`.
pub const VERSION_LEN: usize = 16;
/// Handle value returned by `AVS_Activate` when activation failed.
pub const INVALID_AVS_HANDLE_VALUE: c_long = 1000;
/// Maximum number of pixels of any AvaSpec detector.
pub const MAX_NR_PIXELS: usize = 4096;

pub type AvsHandle = c_long;

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct AvsIdentityType {
    pub SerialNumber: [c_char; AVS_SERIAL_LEN],
    pub UserFriendlyName: [c_char; USER_ID_LEN],
    pub Status: c_uchar,
}

impl Default for AvsIdentityType {
    fn default() -> Self {
        Self {
            SerialNumber: [0; AVS_SERIAL_LEN],
            UserFriendlyName: [0; USER_ID_LEN],
            Status: 0,
        }
    }
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasConfigType {
    pub m_StartPixel: c_ushort,
    pub m_StopPixel: c_ushort,
    pub m_IntegrationTime: f32,
    pub m_IntegrationDelay: c_uint,
    pub m_NrAverages: c_uint,
    pub m_CorDynDark_m_Enable: c_uchar,
    pub m_CorDynDark_m_ForgetPercentage: c_uchar,
    pub m_Smoothing_m_SmoothPix: c_ushort,
    pub m_Smoothing_m_SmoothModel: c_uchar,
    pub m_SaturationDetection: c_uchar,
    pub m_Trigger_m_Mode: c_uchar,
    pub m_Trigger_m_Source: c_uchar,
    pub m_Trigger_m_SourceType: c_uchar,
    pub m_Control_m_StrobeControl: c_ushort,
    pub m_Control_m_LaserDelay: c_uint,
    pub m_Control_m_LaserWidth: c_uint,
    pub m_Control_m_LaserWaveLength: f32,
    pub m_Control_m_StoreToRam: c_ushort,
}

/// Full device configuration block (63484 bytes).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct DeviceConfigType {
    pub m_Len: c_ushort,
    pub m_ConfigVersion: c_ushort,
    pub m_aUserFriendlyId: [c_char; USER_ID_LEN],
    pub m_Detector_m_SensorType: c_uchar,
    pub m_Detector_m_NrPixels: c_ushort,
    pub m_Detector_m_aFit: [f32; 5],
    pub m_Detector_m_NLEnable: bool,
    pub m_Detector_m_aNLCorrect: [f64; 8],
    pub m_Detector_m_aLowNLCounts: f64,
    pub m_Detector_m_aHighNLCounts: f64,
    pub m_Detector_m_Gain: [f32; 2],
    pub m_Detector_m_Reserved: f32,
    pub m_Detector_m_Offset: [f32; 2],
    pub m_Detector_m_ExtOffset: f32,
    pub m_Detector_m_DefectivePixels: [c_ushort; 30],
    pub m_Irradiance_m_IntensityCalib_m_Smoothing_m_SmoothPix: c_ushort,
    pub m_Irradiance_m_IntensityCalib_m_Smoothing_m_SmoothModel: c_uchar,
    pub m_Irradiance_m_IntensityCalib_m_CalInttime: f32,
    pub m_Irradiance_m_IntensityCalib_m_aCalibConvers: [f32; MAX_NR_PIXELS],
    pub m_Irradiance_m_CalibrationType: c_uchar,
    pub m_Irradiance_m_FiberDiameter: c_uint,
    pub m_Reflectance_m_Smoothing_m_SmoothPix: c_ushort,
    pub m_Reflectance_m_Smoothing_m_SmoothModel: c_uchar,
    pub m_Reflectance_m_CalInttime: f32,
    pub m_Reflectance_m_aCalibConvers: [f32; MAX_NR_PIXELS],
    pub m_SpectrumCorrect: [f32; MAX_NR_PIXELS],
    pub m_StandAlone_m_Enable: bool,
    pub m_StandAlone_m_Meas: MeasConfigType,
    pub m_StandAlone_m_Nmsr: c_short,
    pub m_StandAlone_m_Reserved: [c_uchar; 12],
    pub m_Temperature_1_m_aFit: [f32; 5],
    pub m_Temperature_2_m_aFit: [f32; 5],
    pub m_Temperature_3_m_aFit: [f32; 5],
    pub m_TecControl_m_Enable: bool,
    pub m_TecControl_m_Setpoint: f32,
    pub m_TecControl_m_aFit: [f32; 2],
    pub m_ProcessControl_m_AnalogLow: [f32; 2],
    pub m_ProcessControl_m_AnalogHigh: [f32; 2],
    pub m_ProcessControl_m_DigitalLow: [f32; 10],
    pub m_ProcessControl_m_DigitalHigh: [f32; 10],
    pub m_EthernetSettings_m_IpAddr: c_uint,
    pub m_EthernetSettings_m_NetMask: c_uint,
    pub m_EthernetSettings_m_Gateway: c_uint,
    pub m_EthernetSettings_m_DhcpEnabled: c_uchar,
    pub m_EthernetSettings_m_TcpPort: c_ushort,
    pub m_EthernetSettings_m_LinkStatus: c_uchar,
    pub m_Reserved: [c_uchar; 9720],
    pub m_OemData: [c_uchar; 4096],
}

impl DeviceConfigType {
    /// An all-zero configuration block, ready to be filled by `AVS_GetParameter`.
    pub fn zeroed() -> Box<Self> {
        // SAFETY: every field is plain old data for which all-zero is a valid value.
        unsafe { Box::new(std::mem::zeroed()) }
    }
}

#[cfg(feature = "avaspec-sdk")]
extern "C" {
    pub fn AVS_Init(a_Port: c_short) -> c_int;
    pub fn AVS_Done() -> c_int;
    pub fn AVS_UpdateUSBDevices() -> c_int;
    pub fn AVS_GetList(
        a_ListSize: c_uint,
        a_pRequiredSize: *mut c_uint,
        a_pList: *mut AvsIdentityType,
    ) -> c_int;
    pub fn AVS_Activate(a_pDeviceId: *mut AvsIdentityType) -> AvsHandle;
    pub fn AVS_Deactivate(a_hDevice: AvsHandle) -> bool;
    pub fn AVS_GetNumPixels(a_hDevice: AvsHandle, a_pNumPixels: *mut c_ushort) -> c_int;
    pub fn AVS_PrepareMeasure(a_hDevice: AvsHandle, a_pMeasConfig: *mut MeasConfigType) -> c_int;
    pub fn AVS_Measure(a_hDevice: AvsHandle, a_hWnd: *mut c_void, a_Nmsr: c_short) -> c_int;
    pub fn AVS_PollScan(a_hDevice: AvsHandle) -> c_int;
    pub fn AVS_GetLambda(a_hDevice: AvsHandle, a_pWaveLength: *mut f64) -> c_int;
    pub fn AVS_GetScopeData(
        a_hDevice: AvsHandle,
        a_pTimeLabel: *mut c_uint,
        a_pSpectrum: *mut f64,
    ) -> c_int;
    pub fn AVS_StopMeasure(a_hDevice: AvsHandle) -> c_int;
    pub fn AVS_GetVersionInfo(
        a_hDevice: AvsHandle,
        a_pFPGAVersion: *mut c_uchar,
        a_pFirmwareVersion: *mut c_uchar,
        a_pDLLVersion: *mut c_uchar,
    ) -> c_int;
    pub fn AVS_GetParameter(
        a_hDevice: AvsHandle,
        a_Size: c_uint,
        a_pRequiredSize: *mut c_uint,
        a_pDeviceParm: *mut DeviceConfigType,
    ) -> c_int;
    pub fn AVS_GetAnalogIn(a_hDevice: AvsHandle, a_AnalogInId: c_uchar, a_pAnalogIn: *mut f32)
        -> c_int;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes_match_header() {
        assert_eq!(std::mem::size_of::<AvsIdentityType>(), 75);
        assert_eq!(std::mem::size_of::<MeasConfigType>(), 41);
        assert_eq!(std::mem::size_of::<DeviceConfigType>(), 63484);
    }
}
