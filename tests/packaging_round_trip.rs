//! Writing exposure records to disk and reading them back.

use fiber_spectrograph::data::fits::{self, FitsError, FitsFile};
use fiber_spectrograph::data::{DataPackager, ExposureRecord, TaiTime};
use fiber_spectrograph::error::Stage;
use fiber_spectrograph::hardware::MockAvsDriver;
use fiber_spectrograph::SpectrographError;
use tempfile::TempDir;

fn record() -> ExposureRecord {
    let wavelength = MockAvsDriver::wavelengths(2048);
    let spectrum = MockAvsDriver::spectrum(&wavelength, 2500.0);
    ExposureRecord {
        wavelength,
        spectrum,
        duration: 2.5,
        date_begin: TaiTime::parse("1999-01-01T00:00:00.000").unwrap(),
        date_end: TaiTime::parse("1999-01-01T00:00:02.537").unwrap(),
        exposure_type: "totally real data".into(),
        source: "blacklight".into(),
        temperature: -273.0,
        temperature_setpoint: -274.0,
        n_pixels: 2048,
    }
}

#[test]
fn written_file_round_trips_header_and_arrays() {
    let dir = TempDir::new().unwrap();
    let packager = DataPackager::new("TestBlue", "FiberSpectrographCsc", Some(dir.path().into()));
    let record = record();

    let path = packager.process(record.clone()).unwrap().unwrap();

    assert_eq!(path, dir.path().join("TestBlue_1999-01-01T00:00:00.000.fits"));
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len() % fits::BLOCK_SIZE, 0);
    fits::verify(&bytes).unwrap();

    let file = FitsFile::parse(&bytes).unwrap();
    assert_eq!(file.hdus.len(), 2);
    let header = &file.hdus[0].header;
    assert_eq!(header.get_int("FORMAT_V").unwrap(), 1);
    assert_eq!(header.get_str("INSTRUME").unwrap(), "TestBlue");
    assert_eq!(header.get_str("ORIGIN").unwrap(), "FiberSpectrographCsc");
    assert_eq!(header.get_int("DETSIZE").unwrap(), 2048);
    assert_eq!(header.get_str("DATE-BEG").unwrap(), "1999-01-01T00:00:00.000");
    assert_eq!(header.get_str("DATE-END").unwrap(), "1999-01-01T00:00:02.537");
    assert_eq!(header.get_real("EXPTIME").unwrap(), 2.5);
    assert_eq!(header.get_str("TIMESYS").unwrap(), "TAI");
    assert_eq!(header.get_str("IMGTYPE").unwrap(), "totally real data");
    assert_eq!(header.get_str("SOURCE").unwrap(), "blacklight");
    assert_eq!(header.get_real("TEMP_SET").unwrap(), -274.0);
    assert_eq!(header.get_real("CCDTEMP").unwrap(), -273.0);
    assert_eq!(header.get_int("BITPIX").unwrap(), -64);
    assert_eq!(header.get_int("NAXIS1").unwrap(), 2048);

    assert_eq!(file.hdus[0].data_f64().unwrap(), record.spectrum);

    let table = &file.hdus[1];
    assert_eq!(table.header.get_str("XTENSION").unwrap(), "BINTABLE");
    assert_eq!(table.header.get_str("TFORM1").unwrap(), "D");
    assert_eq!(table.header.get_str("TUNIT1").unwrap(), "nm");
    assert_eq!(table.column_f64("wavelength").unwrap(), record.wavelength);

    for hdu in &file.hdus {
        assert!(hdu.header.get_str("CHECKSUM").is_ok());
        assert!(hdu.header.get_str("DATASUM").is_ok());
    }
}

#[test]
fn corrupted_byte_fails_verification() {
    let packager = DataPackager::new("TestBlue", "FiberSpectrographCsc", None);
    let mut bytes = packager.package(&record()).unwrap().to_bytes().unwrap();

    // Last byte of the first data block.
    let index = 2 * fits::BLOCK_SIZE - 1;
    bytes[index] ^= 0x01;

    assert!(matches!(
        fits::verify(&bytes),
        Err(FitsError::DatasumMismatch { hdu: 0, .. })
    ));
}

#[test]
fn missing_output_directory_is_created() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("2024").join("spectra");
    let packager = DataPackager::new("MTRed", "FiberSpectrographCsc", Some(nested.clone()));

    let path = packager.process(record()).unwrap().unwrap();

    assert!(path.starts_with(&nested));
    assert!(path.exists());
}

#[test]
fn existing_file_is_not_overwritten() {
    let dir = TempDir::new().unwrap();
    let packager = DataPackager::new("TestBlue", "FiberSpectrographCsc", Some(dir.path().into()));
    let first = packager.process(record()).unwrap().unwrap();
    let original = std::fs::read(&first).unwrap();

    let mut second = record();
    second.source = "different lamp".into();
    let err = packager.process(second).unwrap_err();

    assert!(matches!(err, SpectrographError::PersistenceFailed { .. }));
    assert_eq!(err.stage(), Stage::Persist);
    assert_eq!(std::fs::read(&first).unwrap(), original);
    // No temporary files left behind.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn invalid_record_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let packager = DataPackager::new("TestBlue", "FiberSpectrographCsc", Some(dir.path().into()));
    let mut bad = record();
    bad.wavelength.truncate(100);

    let err = packager.process(bad).unwrap_err();

    assert_eq!(err.stage(), Stage::Package);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
