//! Exposure records and their on-disk FITS representation.
pub mod fits;
pub mod packager;
pub mod record;

pub use packager::DataPackager;
pub use record::{ExposureRecord, TaiTime};
