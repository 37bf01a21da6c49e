//! End-to-end exposures through `FiberSpectrograph` with the simulator.

use fiber_spectrograph::config::SpectrographConfig;
use fiber_spectrograph::data::fits::FitsFile;
use fiber_spectrograph::data::TaiTime;
use fiber_spectrograph::hardware::mock::{Operation, PollStep};
use fiber_spectrograph::hardware::MockAvsDriver;
use fiber_spectrograph::{
    ExposureRequest, ExposureResult, ExposureState, FiberSpectrograph, SpectrographError,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config(output: Option<&TempDir>) -> SpectrographConfig {
    let mut config = SpectrographConfig::default();
    config.device.index = 1;
    config.acquisition.poll_interval_ms = 50;
    config.acquisition.timeout_margin_s = 1.0;
    config.storage.output_dir = output.map(|dir| dir.path().to_path_buf());
    config
}

#[tokio::test(start_paused = true)]
async fn exposure_is_written_with_device_metadata() {
    let dir = TempDir::new().unwrap();
    let config = config(Some(&dir));
    let driver = MockAvsDriver::simulator("1606192U1", "MTBlue");
    let recorder = driver.recorder();
    let mut spectrograph = FiberSpectrograph::open(driver, &config).unwrap();

    let request = ExposureRequest::new(1.5, "flat", "quartz lamp");
    let result = spectrograph
        .expose_with_timeout(&request, &CancellationToken::new())
        .await
        .unwrap();

    let ExposureResult::Saved {
        file_name,
        path: Some(path),
    } = result
    else {
        panic!("expected a written file");
    };
    assert!(file_name.starts_with("MTBlue_"));
    assert_eq!(path.file_name().unwrap().to_str().unwrap(), file_name);
    assert_eq!(spectrograph.last_state(), Some(ExposureState::Done));

    let file = FitsFile::parse(&std::fs::read(&path).unwrap()).unwrap();
    let header = &file.hdus[0].header;
    assert_eq!(header.get_str("INSTRUME").unwrap(), "MTBlue");
    assert_eq!(header.get_str("ORIGIN").unwrap(), "FiberSpectrograph");
    assert_eq!(header.get_int("DETSIZE").unwrap(), 2048);
    assert_eq!(header.get_real("EXPTIME").unwrap(), 1.5);
    assert_eq!(header.get_str("IMGTYPE").unwrap(), "flat");
    assert_eq!(header.get_str("SOURCE").unwrap(), "quartz lamp");
    // Simulator thermistor: -20 + 10 * 2.5 V
    assert_eq!(header.get_real("CCDTEMP").unwrap(), 5.0);
    assert_eq!(header.get_real("TEMP_SET").unwrap(), 5.0);

    let begin = TaiTime::parse(header.get_str("DATE-BEG").unwrap()).unwrap();
    let end = TaiTime::parse(header.get_str("DATE-END").unwrap()).unwrap();
    assert!(end >= begin);

    assert_eq!(file.hdus[1].column_f64("wavelength").unwrap().len(), 2048);
    assert!(!recorder.called(Operation::StopMeasure));

    spectrograph.close();
    assert_eq!(recorder.active_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn long_source_is_written_in_full() {
    let dir = TempDir::new().unwrap();
    let driver = MockAvsDriver::simulator("1606192U1", "MTBlue");
    let mut spectrograph = FiberSpectrograph::open(driver, &config(Some(&dir))).unwrap();

    let source = "HgAr pencil lamp via integrating sphere port 2, fiber 4 of the red bundle";
    assert!(source.len() > 68);
    let request = ExposureRequest::new(0.5, "arc", source);
    let result = spectrograph
        .expose_with_timeout(&request, &CancellationToken::new())
        .await
        .unwrap();

    let ExposureResult::Saved { path: Some(path), .. } = result else {
        panic!("expected a written file");
    };
    let bytes = std::fs::read(&path).unwrap();
    fiber_spectrograph::data::fits::verify(&bytes).unwrap();
    let file = FitsFile::parse(&bytes).unwrap();
    assert_eq!(file.hdus[0].header.get_str("SOURCE").unwrap(), source);
    assert_eq!(spectrograph.last_state(), Some(ExposureState::Done));
}

#[tokio::test(start_paused = true)]
async fn timed_out_exposure_is_stopped() {
    let driver = MockAvsDriver::simulator("1606192U1", "MTBlue")
        .with_poll_script(std::iter::repeat(PollStep::NotReady).take(1000));
    let recorder = driver.recorder();
    let mut spectrograph = FiberSpectrograph::open(driver, &config(None)).unwrap();

    let err = spectrograph
        .expose_with_timeout(&ExposureRequest::new(0.5, "dark", "none"), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        SpectrographError::ExposureTimedOut { waited } => {
            assert_eq!(waited, Duration::from_millis(1500));
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(spectrograph.last_state(), Some(ExposureState::TimedOut));
    assert_eq!(recorder.count(Operation::StopMeasure), 1);
    assert!(spectrograph.connection().is_connected());
}

#[tokio::test(start_paused = true)]
async fn cancelled_exposure_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let driver = MockAvsDriver::simulator("1606192U1", "MTBlue");
    let recorder = driver.recorder();
    let mut spectrograph = FiberSpectrograph::open(driver, &config(Some(&dir))).unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(75)).await;
        canceller.cancel();
    });

    let result = spectrograph
        .expose(&ExposureRequest::new(10.0, "object", "sky"), &cancel)
        .await
        .unwrap();

    assert_eq!(result, ExposureResult::Cancelled);
    assert_eq!(spectrograph.last_state(), Some(ExposureState::Cancelled));
    assert_eq!(recorder.count(Operation::StopMeasure), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn out_of_range_request_is_rejected_before_the_device() {
    let driver = MockAvsDriver::simulator("1606192U1", "MTBlue");
    let recorder = driver.recorder();
    let mut spectrograph = FiberSpectrograph::open(driver, &config(None)).unwrap();

    let err = spectrograph
        .expose(&ExposureRequest::new(0.0, "dark", "none"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SpectrographError::ExposureOutOfRange { .. }));
    assert!(!recorder.called(Operation::PrepareMeasure));
    assert_eq!(spectrograph.last_state(), None);
}

#[test]
fn configured_serial_must_be_attached() {
    let driver = MockAvsDriver::simulator("1606190U1", "MTRed");
    let err = FiberSpectrograph::open(driver, &config(None))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SpectrographError::DeviceNotFound { ref serial_number, .. } if serial_number == "1606192U1"
    ));
}
