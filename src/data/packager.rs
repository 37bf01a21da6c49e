//! Packaging of exposure records into checksummed FITS files.
//!
//! The intensity spectrum is the primary array; the wavelength solution is
//! the single `wavelength` column of a `BINTABLE` extension. Every HDU gets
//! `DATASUM` and `CHECKSUM`.
//!
//! Persistence is all-or-nothing: the file is written under a temporary name
//! in the destination directory, synced, then moved into place with a
//! no-clobber rename. An existing file is never replaced, even by a writer
//! racing this one.

use super::fits::{Card, FitsFile, Hdu, Header};
use super::record::ExposureRecord;
use crate::error::{AppResult, SpectrographError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Version of the file layout produced here.
pub const FORMAT_VERSION: i64 = 1;

/// Builds and optionally writes data files for one instrument.
#[derive(Debug, Clone)]
pub struct DataPackager {
    instrument: String,
    origin: String,
    output_dir: Option<PathBuf>,
}

impl DataPackager {
    /// `output_dir = None` packages without writing anything.
    pub fn new(
        instrument: impl Into<String>,
        origin: impl Into<String>,
        output_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            origin: origin.into(),
            output_dir,
        }
    }

    /// Instrument name used in headers and file names.
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Destination directory, if files are written.
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Exposure metadata keywords for the primary header.
    pub fn make_header(&self, record: &ExposureRecord) -> Header {
        let mut header = Header::new();
        header.push(Card::new("FORMAT_V", FORMAT_VERSION).with_comment("file format version"));
        header.push(Card::new("INSTRUME", self.instrument.as_str()));
        header.push(Card::new("ORIGIN", self.origin.as_str()));
        header.push(Card::new("DETSIZE", record.n_pixels).with_comment("number of detector pixels"));
        header.push(Card::new("DATE-BEG", record.date_begin.to_fits()));
        header.push(Card::new("DATE-END", record.date_end.to_fits()));
        header.push(Card::new("EXPTIME", record.duration).with_comment("[s] exposure duration"));
        header.push(Card::new("TIMESYS", "TAI"));
        header.push(Card::new("IMGTYPE", record.exposure_type.as_str()));
        header.push(Card::new("SOURCE", record.source.as_str()));
        header.push(
            Card::new("TEMP_SET", record.temperature_setpoint)
                .with_comment("[deg_C] detector temperature setpoint"),
        );
        header.push(
            Card::new("CCDTEMP", record.temperature).with_comment("[deg_C] optical bench temperature"),
        );
        header
    }

    /// Build the two-HDU container with checksums.
    pub fn package(&self, record: &ExposureRecord) -> AppResult<FitsFile> {
        record.validate()?;

        let mut primary = Hdu::primary_f64(&record.spectrum, &self.make_header(record));
        primary.update_checksums()?;
        let mut table = Hdu::bintable_f64("wavelength", "nm", &record.wavelength);
        table.update_checksums()?;

        Ok(FitsFile::new(vec![primary, table]))
    }

    /// `<instrument>_<DATE-BEG>.fits`, taken from the container's primary header.
    pub fn file_name(container: &FitsFile) -> AppResult<String> {
        let header = &container
            .primary()
            .ok_or_else(|| SpectrographError::InvalidRecord("container has no HDUs".into()))?
            .header;
        let instrument = header.get_str("INSTRUME")?;
        let date_begin = header.get_str("DATE-BEG")?;
        Ok(format!("{instrument}_{date_begin}.fits"))
    }

    /// Write `container` to the output directory.
    ///
    /// Returns the written path, or `None` when no output directory is set.
    pub fn persist(&self, container: &FitsFile) -> AppResult<Option<PathBuf>> {
        let Some(dir) = &self.output_dir else {
            tracing::debug!("No output directory configured, not writing data file");
            return Ok(None);
        };
        let path = dir.join(Self::file_name(container)?);
        let bytes = container.to_bytes()?;
        super::fits::verify(&bytes).map_err(|err| SpectrographError::PersistenceFailed {
            path: path.clone(),
            reason: err.to_string(),
        })?;

        write_atomically(&path, &bytes).map_err(|err| SpectrographError::PersistenceFailed {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "Wrote spectrograph data file");
        Ok(Some(path))
    }

    /// Package and persist one record, consuming it.
    pub fn process(&self, record: ExposureRecord) -> AppResult<Option<PathBuf>> {
        let container = self.package(&record)?;
        self.persist(&container)
    }
}

/// Write `bytes` to `path` unless something is already there.
///
/// The temporary file is removed when it is dropped on any error path.
fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::TaiTime;

    fn record() -> ExposureRecord {
        ExposureRecord {
            wavelength: vec![300.0, 650.0, 1000.0],
            spectrum: vec![10.0, 20.0, 30.0],
            duration: 2.5,
            date_begin: TaiTime::parse("1999-01-01T00:00:00.000").unwrap(),
            date_end: TaiTime::parse("1999-01-01T00:00:02.500").unwrap(),
            exposure_type: "totally real data".into(),
            source: "blacklight".into(),
            temperature: -273.0,
            temperature_setpoint: -274.0,
            n_pixels: 3,
        }
    }

    #[test]
    fn header_is_deterministic() {
        let packager = DataPackager::new("TestBlue", "Unit Test", None);
        assert_eq!(packager.make_header(&record()), packager.make_header(&record()));
    }

    #[test]
    fn no_output_dir_means_no_file() {
        let packager = DataPackager::new("TestBlue", "Unit Test", None);
        assert_eq!(packager.process(record()).unwrap(), None);
    }

    #[test]
    fn file_name_uses_tai_begin_time() {
        let packager = DataPackager::new("TestBlue", "Unit Test", None);
        let container = packager.package(&record()).unwrap();
        assert_eq!(
            DataPackager::file_name(&container).unwrap(),
            "TestBlue_1999-01-01T00:00:00.000.fits"
        );
    }

    #[test]
    fn invalid_record_is_not_packaged() {
        let packager = DataPackager::new("TestBlue", "Unit Test", None);
        let mut bad = record();
        bad.n_pixels = 4;
        assert!(matches!(
            packager.package(&bad),
            Err(SpectrographError::InvalidRecord(_))
        ));
    }

    #[test]
    fn long_tags_are_packaged_in_full() {
        let packager = DataPackager::new("TestBlue", "Unit Test", None);
        let mut long = record();
        long.source = format!("Xe arc lamp, {}", "fiber bundle B ".repeat(8));
        long.exposure_type = "t".repeat(70);
        let container = packager.package(&long).unwrap();

        let bytes = container.to_bytes().unwrap();
        crate::data::fits::verify(&bytes).unwrap();
        let parsed = FitsFile::parse(&bytes).unwrap();
        let header = &parsed.hdus[0].header;
        assert_eq!(header.get_str("SOURCE").unwrap(), long.source.trim_end());
        assert_eq!(header.get_str("IMGTYPE").unwrap(), long.exposure_type);
    }

    #[test]
    fn existing_target_is_left_alone() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("TestBlue_x.fits");
        fs::write(&path, b"first").unwrap();

        let err = write_atomically(&path, b"second").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&path).unwrap(), b"first");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn racing_writers_never_clobber() {
        let dir = tempfile::TempDir::new().unwrap();
        for round in 0..16 {
            let path = dir.path().join(format!("TestBlue_{round}.fits"));
            let barrier = std::sync::Barrier::new(2);
            let results: Vec<_> = std::thread::scope(|scope| {
                let writers: Vec<_> = [b"aaaa", b"bbbb"]
                    .into_iter()
                    .map(|bytes| {
                        let (path, barrier) = (&path, &barrier);
                        scope.spawn(move || {
                            barrier.wait();
                            write_atomically(path, bytes).map(|()| bytes)
                        })
                    })
                    .collect();
                writers.into_iter().map(|w| w.join().unwrap()).collect()
            });

            let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1, "round {round}");
            assert_eq!(fs::read(&path).unwrap(), winners[0].as_slice());
        }
        // Only the written files; no temporaries.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 16);
    }
}
