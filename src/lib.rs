//! # Fiber Spectrograph Controller
//!
//! Control library for Avantes AvaSpec fiber-fed spectrographs. It connects to
//! a single device over the vendor library, takes one exposure at a time, and
//! packages each exposure as a checksummed FITS file.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: the [`AvsDriver`](hardware::AvsDriver) capability trait,
//!   the simulator, the connection manager and the acquisition state machine.
//!   The `avaspec_hardware` feature adds the `libavs` binding.
//! - **`data`**: the exposure record, TAI timestamps, the FITS codec and the
//!   data packager.
//! - **`spectrograph`**: the exposure façade tying the two together.
//! - **`config`**: Figment-based configuration (TOML plus `FIBERSPEC_` env vars).
//! - **`tracing_setup`**: `tracing-subscriber` initialisation for binaries.
//! - **`error`**: [`SpectrographError`](error::SpectrographError), tagged by
//!   workflow stage.

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod spectrograph;
pub mod tracing_setup;

pub use error::{AppResult, SpectrographError};
pub use spectrograph::{ExposureRequest, ExposureResult, ExposureState, FiberSpectrograph};
