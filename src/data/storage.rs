//! Session log writers.
//!
//! A [`Recorder`] receives the scan configuration once, when the session opens
//! its log, and then every accepted stream line. [`CsvRecorder`] is the
//! persistent sink; [`MemoryRecorder`] keeps everything in memory for tests.
//!
//! ## On-disk layout
//!
//! ```text
//! <data_dir>/Distances_<MM_DD_YY_HH_MM_SS>.csv   header + one record per line
//! <data_dir>/Distances_<MM_DD_YY_HH_MM_SS>.json  scan configuration (sidecar)
//! ```
//!
//! The sample log is opened, appended and closed for every record. A crash
//! mid-session loses at most the record being written.

use crate::config::ScanConfiguration;
use crate::error::ScanResult;
use crate::protocol::messages::SAMPLE_LOG_HEADER;
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Sink for accepted stream lines.
pub trait Recorder {
    /// Called once, after the configuration has been sent to the device.
    fn begin(&mut self, configuration: &ScanConfiguration) -> ScanResult<()>;

    /// Persist one line as received (line ending already removed).
    ///
    /// `since_previous` is the arrival latency relative to the previous
    /// record; sinks may log it but it is not part of the sample schema.
    fn record(&mut self, line: &str, since_previous: Duration) -> ScanResult<()>;
}

impl<R: Recorder + ?Sized> Recorder for &mut R {
    fn begin(&mut self, configuration: &ScanConfiguration) -> ScanResult<()> {
        (**self).begin(configuration)
    }

    fn record(&mut self, line: &str, since_previous: Duration) -> ScanResult<()> {
        (**self).record(line, since_previous)
    }
}

/// Appends records to a timestamped CSV file.
#[derive(Debug, Clone)]
pub struct CsvRecorder {
    log_path: PathBuf,
    sidecar_path: Option<PathBuf>,
}

impl CsvRecorder {
    /// Prepare a log in `data_dir` named after `started_at`.
    ///
    /// Creates the directory if it does not exist. No file is written until
    /// [`Recorder::begin`].
    pub fn create(data_dir: impl AsRef<Path>, started_at: DateTime<Local>) -> ScanResult<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            fs::create_dir_all(data_dir)?;
            info!("Created '{}' directory.", data_dir.display());
        } else {
            info!("Checked if '{}' directory is available.", data_dir.display());
        }

        let stem = session_stem(started_at);
        let log_path = data_dir.join(format!("{}.csv", stem));
        let sidecar_path = Some(data_dir.join(format!("{}.json", stem)));
        info!("Sample log will be written to '{}'.", log_path.display());

        Ok(Self {
            log_path,
            sidecar_path,
        })
    }

    /// Enable or disable the JSON configuration sidecar.
    pub fn with_sidecar(mut self, enabled: bool) -> Self {
        if enabled {
            self.sidecar_path = Some(self.log_path.with_extension("json"));
        } else {
            self.sidecar_path = None;
        }
        self
    }

    /// Path of the sample log.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Path of the sidecar, if enabled.
    pub fn sidecar_path(&self) -> Option<&Path> {
        self.sidecar_path.as_deref()
    }

    fn append_line(&self, line: &str) -> ScanResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

impl Recorder for CsvRecorder {
    fn begin(&mut self, configuration: &ScanConfiguration) -> ScanResult<()> {
        if let Some(sidecar) = &self.sidecar_path {
            let json = serde_json::to_string_pretty(configuration)?;
            fs::write(sidecar, json)?;
            info!("Wrote session configuration to '{}'.", sidecar.display());
        }
        self.append_line(SAMPLE_LOG_HEADER)
    }

    fn record(&mut self, line: &str, _since_previous: Duration) -> ScanResult<()> {
        self.append_line(line)
    }
}

/// File stem for a session started at `started_at`.
pub fn session_stem(started_at: DateTime<Local>) -> String {
    format!("Distances_{}", started_at.format("%m_%d_%y_%H_%M_%S"))
}

/// Read back the configuration sidecar written by [`CsvRecorder`].
pub fn load_sidecar(path: impl AsRef<Path>) -> ScanResult<ScanConfiguration> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Keeps the configuration and every line in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    configuration: Option<ScanConfiguration>,
    lines: Vec<String>,
    latencies: Vec<Duration>,
}

impl MemoryRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration passed to `begin`, if called
    pub fn configuration(&self) -> Option<&ScanConfiguration> {
        self.configuration.as_ref()
    }

    /// Recorded lines in arrival order
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Arrival latency of each recorded line
    pub fn latencies(&self) -> &[Duration] {
        &self.latencies
    }
}

impl Recorder for MemoryRecorder {
    fn begin(&mut self, configuration: &ScanConfiguration) -> ScanResult<()> {
        self.configuration = Some(configuration.clone());
        Ok(())
    }

    fn record(&mut self, line: &str, since_previous: Duration) -> ScanResult<()> {
        self.lines.push(line.to_string());
        self.latencies.push(since_previous);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn started_at() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .unwrap()
    }

    #[test]
    fn test_session_stem_encodes_start_time() {
        assert_eq!(session_stem(started_at()), "Distances_03_09_24_14_05_07");
    }

    #[test]
    fn test_creates_missing_data_directory() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("Data");
        let recorder = CsvRecorder::create(&data_dir, started_at()).unwrap();

        assert!(data_dir.is_dir());
        assert_eq!(
            recorder.log_path(),
            data_dir.join("Distances_03_09_24_14_05_07.csv")
        );
        assert!(!recorder.log_path().exists());
    }

    #[test]
    fn test_header_records_and_sidecar() {
        let dir = tempdir().unwrap();
        let mut recorder = CsvRecorder::create(dir.path(), started_at()).unwrap();
        let configuration = ScanConfiguration::new(170.0, 70.0, 1.0, 1.0)
            .with_metadata("sphere_diameter_mm", serde_json::json!(40.0));

        recorder.begin(&configuration).unwrap();
        recorder.record("0,0,48.5", Duration::ZERO).unwrap();

        // Visible on disk after each record
        let content = fs::read_to_string(recorder.log_path()).unwrap();
        assert_eq!(content, "x [mm],y [mm],z [mm]\n0,0,48.5\n");

        recorder
            .record("garbled\u{fffd}line", Duration::from_millis(12))
            .unwrap();
        let content = fs::read_to_string(recorder.log_path()).unwrap();
        assert!(content.ends_with("garbled\u{fffd}line\n"));

        let sidecar = recorder.sidecar_path().unwrap();
        assert_eq!(load_sidecar(sidecar).unwrap(), configuration);
    }

    #[test]
    fn test_sidecar_can_be_disabled() {
        let dir = tempdir().unwrap();
        let mut recorder = CsvRecorder::create(dir.path(), started_at())
            .unwrap()
            .with_sidecar(false);
        recorder
            .begin(&ScanConfiguration::default())
            .unwrap();

        assert!(recorder.sidecar_path().is_none());
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_memory_recorder_keeps_latencies() {
        let mut recorder = MemoryRecorder::new();
        recorder.record("a", Duration::from_millis(3)).unwrap();
        recorder.record("b", Duration::from_millis(5)).unwrap();
        assert_eq!(recorder.lines(), ["a", "b"]);
        assert_eq!(
            recorder.latencies(),
            [Duration::from_millis(3), Duration::from_millis(5)]
        );
        assert!(recorder.configuration().is_none());
    }
}
