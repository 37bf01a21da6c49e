//! AvaSpec spectrograph hardware layer.
//!
//! The vendor library is modelled as the [`AvsDriver`] trait. [`MockAvsDriver`]
//! is the in-process implementation used by tests and simulation mode; the
//! `avaspec_hardware` feature adds `AvaspecDriver`, which binds to `libavs`.

pub mod acquisition;
#[cfg(feature = "avaspec_hardware")]
pub mod avaspec;
pub mod connection;
pub mod driver;
pub mod mock;
pub mod return_code;

pub use acquisition::{AcquisitionController, AcquisitionState, ExposureOutcome, Measurement};
#[cfg(feature = "avaspec_hardware")]
pub use avaspec::AvaspecDriver;
pub use connection::{ActiveDevice, ConnectionManager, DeviceStatus};
pub use driver::{AvsDriver, DeviceHandle, DeviceIdentity, MeasureConfig};
pub use mock::MockAvsDriver;
pub use return_code::{AvsCode, AvsReturnCode};
