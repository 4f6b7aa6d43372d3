//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for acquisition
//! and analysis runs. Configuration is layered:
//! 1. Built-in defaults (the reference scan: 170 x 70 mm at 1 mm steps)
//! 2. `config/scan.toml` (or any file passed on the command line)
//! 3. Environment variables prefixed with `SURFACE_DAQ_`, nested keys split by `__`
//!
//! # Example
//! ```no_run
//! use surface_daq::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // SURFACE_DAQ_SERIAL__PORT=/dev/ttyUSB0 overrides [serial] port
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Scanning {} x {} mm", settings.scan.x_distance_mm, settings.scan.y_distance_mm);
//! # Ok(())
//! # }
//! ```

use crate::analysis::spline::SplineDegree;
use crate::data::grid::DEFAULT_REFERENCE_HEIGHT_MM;
use crate::error::{ScanError, ScanResult};
use crate::logging::OutputFormat;
use crate::transport::BAUD_RATE;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/scan.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SURFACE_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial channel and session timing
    #[serde(default)]
    pub serial: SerialConfig,
    /// Scan parameters sent to the device
    #[serde(default)]
    pub scan: ScanConfiguration,
    /// Where session logs are written
    #[serde(default)]
    pub storage: StorageConfig,
    /// Reconstruction and integration settings
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Serial channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path (e.g. `/dev/ttyACM0`)
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate; the device firmware is fixed at 115200
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Wait after opening the port while the device boots
    #[serde(default = "default_boot_delay")]
    pub boot_delay_ms: u64,
    /// Wait between the last configuration value and `__start__`
    #[serde(default = "default_start_delay")]
    pub start_delay_ms: u64,
    /// Optional bound on a single line read; unset blocks indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    /// Optional bound on handshake attempts; unset retries forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_max_attempts: Option<u32>,
}

/// Session Configuration sent to the device.
///
/// The device consumes values positionally, so the wire order is fixed by
/// [`ScanConfiguration::wire_values`] and never by map iteration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfiguration {
    /// Travel along x in mm
    #[serde(default = "default_x_distance")]
    pub x_distance_mm: f64,
    /// Travel along y in mm
    #[serde(default = "default_y_distance")]
    pub y_distance_mm: f64,
    /// Step between samples along x in mm
    #[serde(default = "default_step")]
    pub x_step_mm: f64,
    /// Step between samples along y in mm
    #[serde(default = "default_step")]
    pub y_step_mm: f64,
    /// Descriptive metadata (`sphere_diameter_mm`, `fixture_heights_mm`, ...).
    /// Persisted in the sidecar, never sent to the device.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output directory for session logs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Write the JSON sidecar next to each sample log
    #[serde(default = "default_enabled")]
    pub write_sidecar: bool,
}

/// Analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Sensor mounting offset; cells store `reference_height_mm - z`
    #[serde(default = "default_reference_height")]
    pub reference_height_mm: f64,
    /// Interpolation used for volume integration
    #[serde(default)]
    pub spline_degree: SplineDegree,
}

// Default value functions
fn default_name() -> String {
    "Surface DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baud_rate() -> u32 {
    BAUD_RATE
}

fn default_boot_delay() -> u64 {
    3000
}

fn default_start_delay() -> u64 {
    1000
}

fn default_x_distance() -> f64 {
    170.0
}

fn default_y_distance() -> f64 {
    70.0
}

fn default_step() -> f64 {
    1.0
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("Data")
}

fn default_enabled() -> bool {
    true
}

fn default_reference_height() -> f64 {
    DEFAULT_REFERENCE_HEIGHT_MM
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            boot_delay_ms: default_boot_delay(),
            start_delay_ms: default_start_delay(),
            read_timeout_ms: None,
            handshake_max_attempts: None,
        }
    }
}

impl SerialConfig {
    /// Boot settle delay as a `Duration`
    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }

    /// Start settle delay as a `Duration`
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    /// Per-line read bound, if any
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ScanConfiguration {
    fn default() -> Self {
        Self {
            x_distance_mm: default_x_distance(),
            y_distance_mm: default_y_distance(),
            x_step_mm: default_step(),
            y_step_mm: default_step(),
            metadata: BTreeMap::new(),
        }
    }
}

impl ScanConfiguration {
    /// Create a configuration without metadata
    pub fn new(x_distance_mm: f64, y_distance_mm: f64, x_step_mm: f64, y_step_mm: f64) -> Self {
        Self {
            x_distance_mm,
            y_distance_mm,
            x_step_mm,
            y_step_mm,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a descriptive metadata entry
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Values in the order the device reads them.
    pub fn wire_values(&self) -> [(&'static str, f64); 4] {
        [
            ("x_distance_mm", self.x_distance_mm),
            ("y_distance_mm", self.y_distance_mm),
            ("x_step_mm", self.x_step_mm),
            ("y_step_mm", self.y_step_mm),
        ]
    }

    /// Every distance and step must be a strictly positive finite real.
    pub fn validate(&self) -> ScanResult<()> {
        for (key, value) in self.wire_values() {
            if !value.is_finite() || value <= 0.0 {
                return Err(ScanError::Configuration(format!(
                    "'{}' must be a strictly positive finite value, got {}",
                    key, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            write_sidecar: default_enabled(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            reference_height_mm: default_reference_height(),
            spline_degree: SplineDegree::default(),
        }
    }
}

impl Settings {
    /// Load configuration from `config/scan.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix `SURFACE_DAQ_`.
    /// Example: `SURFACE_DAQ_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> ScanResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(ScanError::Configuration(
                "baud_rate must be greater than zero".to_string(),
            ));
        }

        if self.serial.handshake_max_attempts == Some(0) {
            return Err(ScanError::Configuration(
                "handshake_max_attempts must be at least 1 when set".to_string(),
            ));
        }

        let reference = self.analysis.reference_height_mm;
        if !reference.is_finite() {
            return Err(ScanError::Configuration(format!(
                "reference_height_mm must be finite, got {}",
                reference
            )));
        }

        self.scan.validate()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> ScanResult<String> {
        toml::to_string_pretty(self).map_err(|e| ScanError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.serial.boot_delay(), Duration::from_secs(3));
        assert_eq!(settings.serial.read_timeout(), None);
        assert_eq!(settings.analysis.reference_height_mm, 50.0);
    }

    #[test]
    fn test_wire_order_is_fixed() {
        let scan = ScanConfiguration::new(1.0, 2.0, 3.0, 4.0)
            .with_metadata("a_first_key", serde_json::json!(99.0));
        let keys: Vec<&str> = scan.wire_values().iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec!["x_distance_mm", "y_distance_mm", "x_step_mm", "y_step_mm"]
        );
        let values: Vec<f64> = scan.wire_values().iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_non_positive_scan_values_rejected() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let scan = ScanConfiguration::new(170.0, 70.0, bad, 1.0);
            let err = scan.validate().unwrap_err();
            assert!(err.to_string().contains("x_step_mm"));
        }
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_handshake_bound_rejected() {
        let mut settings = Settings::default();
        settings.serial.handshake_max_attempts = Some(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "scan.toml",
                r#"
                [serial]
                port = "/dev/ttyUSB3"
                handshake_max_attempts = 5

                [scan]
                x_distance_mm = 120
                y_step_mm = 0.5

                [scan.metadata]
                sphere_diameter_mm = 40.0
                "#,
            )?;
            jail.set_env("SURFACE_DAQ_ANALYSIS__REFERENCE_HEIGHT_MM", "42.5");

            let settings = Settings::load_from("scan.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.serial.port, "/dev/ttyUSB3");
            assert_eq!(settings.serial.handshake_max_attempts, Some(5));
            assert_eq!(settings.serial.baud_rate, 115_200);
            assert_eq!(settings.scan.x_distance_mm, 120.0);
            assert_eq!(settings.scan.y_distance_mm, 70.0);
            assert_eq!(settings.scan.y_step_mm, 0.5);
            assert_eq!(
                settings.scan.metadata.get("sphere_diameter_mm"),
                Some(&serde_json::json!(40.0))
            );
            assert_eq!(settings.analysis.reference_height_mm, 42.5);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load_from("absent.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.scan, ScanConfiguration::default());
            Ok(())
        });
    }

    #[test]
    fn test_toml_rendering_round_trips_scan_section() {
        let settings = Settings::default();
        let rendered = settings.to_toml().unwrap();
        assert!(rendered.contains("x_distance_mm = 170.0"));
        assert!(!rendered.contains("read_timeout_ms"));
    }
}
