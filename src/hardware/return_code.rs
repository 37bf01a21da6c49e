//! AvaSpec library return codes.
//!
//! Taken from `avaspec.h`, matching section 3.6.1 "Return Value Constants" of
//! the Avantes Linux Library Manual (version 9.6.0.0). Zero is success, every
//! documented failure is negative, and `AVS_Activate` reports failure with the
//! out-of-band handle value 1000.

use std::fmt;

/// Documented return codes of the AvaSpec library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum AvsReturnCode {
    Success = 0,
    InvalidParameter = -1,
    OperationNotSupported = -2,
    DeviceNotFound = -3,
    InvalidDeviceId = -4,
    OperationPending = -5,
    Timeout = -6,
    InvalidPassword = -7,
    InvalidMeasData = -8,
    InvalidSize = -9,
    InvalidPixelRange = -10,
    InvalidIntTime = -11,
    InvalidCombination = -12,
    InvalidConfiguration = -13,
    NoMeasBufferAvail = -14,
    Unknown = -15,
    Communication = -16,
    NoSpectraInRam = -17,
    InvalidDllVersion = -18,
    NoMemory = -19,
    DllInitialisation = -20,
    InvalidState = -21,
    InvalidReply = -22,
    Access = -24,
    InvalidParameterNrPixels = -100,
    InvalidParameterAdcGain = -101,
    InvalidParameterAdcOffset = -102,
    InvalidMeasparamAvgSat2 = -110,
    InvalidMeasparamAvgRam = -111,
    InvalidMeasparamSyncRam = -112,
    InvalidMeasparamLevelRam = -113,
    InvalidMeasparamSat2Ram = -114,
    InvalidMeasparamFwverRam = -115,
    InvalidMeasparamDyndark = -116,
    NotSupportedBySensorType = -120,
    NotSupportedByFwVer = -121,
    NotSupportedByFpgaVer = -122,
    SlCalibrationNotAvailable = -140,
    SlStartpixelNotInRange = -141,
    SlEndpixelNotInRange = -142,
    SlStartpixGtEndpix = -143,
    SlMfactorOutOfRange = -144,
    InvalidHandle = 1000,
}

impl AvsReturnCode {
    const ALL: [AvsReturnCode; 43] = [
        Self::Success,
        Self::InvalidParameter,
        Self::OperationNotSupported,
        Self::DeviceNotFound,
        Self::InvalidDeviceId,
        Self::OperationPending,
        Self::Timeout,
        Self::InvalidPassword,
        Self::InvalidMeasData,
        Self::InvalidSize,
        Self::InvalidPixelRange,
        Self::InvalidIntTime,
        Self::InvalidCombination,
        Self::InvalidConfiguration,
        Self::NoMeasBufferAvail,
        Self::Unknown,
        Self::Communication,
        Self::NoSpectraInRam,
        Self::InvalidDllVersion,
        Self::NoMemory,
        Self::DllInitialisation,
        Self::InvalidState,
        Self::InvalidReply,
        Self::Access,
        Self::InvalidParameterNrPixels,
        Self::InvalidParameterAdcGain,
        Self::InvalidParameterAdcOffset,
        Self::InvalidMeasparamAvgSat2,
        Self::InvalidMeasparamAvgRam,
        Self::InvalidMeasparamSyncRam,
        Self::InvalidMeasparamLevelRam,
        Self::InvalidMeasparamSat2Ram,
        Self::InvalidMeasparamFwverRam,
        Self::InvalidMeasparamDyndark,
        Self::NotSupportedBySensorType,
        Self::NotSupportedByFwVer,
        Self::NotSupportedByFpgaVer,
        Self::SlCalibrationNotAvailable,
        Self::SlStartpixelNotInRange,
        Self::SlEndpixelNotInRange,
        Self::SlStartpixGtEndpix,
        Self::SlMfactorOutOfRange,
        Self::InvalidHandle,
    ];

    /// Look up a raw value in the documented table.
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| *code as i32 == raw)
    }

    /// Vendor constant name, as printed in the library manual.
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::InvalidParameter => "ERR_INVALID_PARAMETER",
            Self::OperationNotSupported => "ERR_OPERATION_NOT_SUPPORTED",
            Self::DeviceNotFound => "ERR_DEVICE_NOT_FOUND",
            Self::InvalidDeviceId => "ERR_INVALID_DEVICE_ID",
            Self::OperationPending => "ERR_OPERATION_PENDING",
            Self::Timeout => "ERR_TIMEOUT",
            Self::InvalidPassword => "ERR_INVALID_PASSWORD",
            Self::InvalidMeasData => "ERR_INVALID_MEAS_DATA",
            Self::InvalidSize => "ERR_INVALID_SIZE",
            Self::InvalidPixelRange => "ERR_INVALID_PIXEL_RANGE",
            Self::InvalidIntTime => "ERR_INVALID_INT_TIME",
            Self::InvalidCombination => "ERR_INVALID_COMBINATION",
            Self::InvalidConfiguration => "ERR_INVALID_CONFIGURATION",
            Self::NoMeasBufferAvail => "ERR_NO_MEAS_BUFFER_AVAIL",
            Self::Unknown => "ERR_UNKNOWN",
            Self::Communication => "ERR_COMMUNICATION",
            Self::NoSpectraInRam => "ERR_NO_SPECTRA_IN_RAM",
            Self::InvalidDllVersion => "ERR_INVALID_DLL_VERSION",
            Self::NoMemory => "ERR_NO_MEMORY",
            Self::DllInitialisation => "ERR_DLL_INITIALISATION",
            Self::InvalidState => "ERR_INVALID_STATE",
            Self::InvalidReply => "ERR_INVALID_REPLY",
            Self::Access => "ERR_ACCESS",
            Self::InvalidParameterNrPixels => "ERR_INVALID_PARAMETER_NR_PIXELS",
            Self::InvalidParameterAdcGain => "ERR_INVALID_PARAMETER_ADC_GAIN",
            Self::InvalidParameterAdcOffset => "ERR_INVALID_PARAMETER_ADC_OFFSET",
            Self::InvalidMeasparamAvgSat2 => "ERR_INVALID_MEASPARAM_AVG_SAT2",
            Self::InvalidMeasparamAvgRam => "ERR_INVALID_MEASPARAM_AVG_RAM",
            Self::InvalidMeasparamSyncRam => "ERR_INVALID_MEASPARAM_SYNC_RAM",
            Self::InvalidMeasparamLevelRam => "ERR_INVALID_MEASPARAM_LEVEL_RAM",
            Self::InvalidMeasparamSat2Ram => "ERR_INVALID_MEASPARAM_SAT2_RAM",
            Self::InvalidMeasparamFwverRam => "ERR_INVALID_MEASPARAM_FWVER_RAM",
            Self::InvalidMeasparamDyndark => "ERR_INVALID_MEASPARAM_DYNDARK",
            Self::NotSupportedBySensorType => "ERR_NOT_SUPPORTED_BY_SENSOR_TYPE",
            Self::NotSupportedByFwVer => "ERR_NOT_SUPPORTED_BY_FW_VER",
            Self::NotSupportedByFpgaVer => "ERR_NOT_SUPPORTED_BY_FPGA_VER",
            Self::SlCalibrationNotAvailable => "ERR_SL_CALIBRATION_NOT_AVAILABLE",
            Self::SlStartpixelNotInRange => "ERR_SL_STARTPIXEL_NOT_IN_RANGE",
            Self::SlEndpixelNotInRange => "ERR_SL_ENDPIXEL_NOT_IN_RANGE",
            Self::SlStartpixGtEndpix => "ERR_SL_STARTPIX_GT_ENDPIX",
            Self::SlMfactorOutOfRange => "ERR_SL_MFACTOR_OUT_OF_RANGE",
            Self::InvalidHandle => "INVALID_AVS_HANDLE_VALUE",
        }
    }
}

/// A raw value returned by the vendor library.
///
/// Unknown values are kept as-is so they can still be reported; the library
/// occasionally returns codes newer than the table above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AvsCode(pub i32);

impl AvsCode {
    /// The success sentinel.
    pub const SUCCESS: AvsCode = AvsCode(AvsReturnCode::Success as i32);
    /// Handle value reported by a failed activation.
    pub const INVALID_HANDLE: AvsCode = AvsCode(AvsReturnCode::InvalidHandle as i32);

    /// Raw integer value.
    pub fn raw(self) -> i32 {
        self.0
    }

    /// Documented meaning of this value, if any.
    pub fn known(self) -> Option<AvsReturnCode> {
        AvsReturnCode::from_raw(self.0)
    }

    /// Negative values are failures; zero and positive counts are not.
    pub fn is_error(self) -> bool {
        self.0 < 0
    }

    /// Convert a status-style return into a `Result`.
    pub fn check(self) -> Result<(), AvsCode> {
        if self.is_error() {
            Err(self)
        } else {
            Ok(())
        }
    }
}

impl From<AvsReturnCode> for AvsCode {
    fn from(code: AvsReturnCode) -> Self {
        AvsCode(code as i32)
    }
}

impl fmt::Display for AvsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(code) => write!(f, "{} ({})", code.name(), self.0),
            None => write!(f, "unknown code {}", self.0),
        }
    }
}
