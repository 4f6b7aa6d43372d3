//! Scan samples and the sample-log reader.
//!
//! The reconstructor only needs "something exposing x, y and z", expressed by
//! [`SampleRecord`]. The persisted CSV log is the canonical source and is read
//! with [`read_samples_csv`].

use crate::error::{ScanError, ScanResult};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

/// One measurement: integer mm position and real mm range reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// x position in mm
    pub x: u32,
    /// y position in mm
    pub y: u32,
    /// Range reading in mm
    pub z: f64,
}

impl Sample {
    /// Create a sample
    pub fn new(x: u32, y: u32, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Capability interface for anything that can feed the reconstructor.
pub trait SampleRecord {
    /// x position in mm
    fn x(&self) -> u32;
    /// y position in mm
    fn y(&self) -> u32;
    /// Range reading in mm
    fn z(&self) -> f64;
}

impl SampleRecord for Sample {
    fn x(&self) -> u32 {
        self.x
    }

    fn y(&self) -> u32 {
        self.y
    }

    fn z(&self) -> f64 {
        self.z
    }
}

impl SampleRecord for (u32, u32, f64) {
    fn x(&self) -> u32 {
        self.0
    }

    fn y(&self) -> u32 {
        self.1
    }

    fn z(&self) -> f64 {
        self.2
    }
}

impl<T: SampleRecord + ?Sized> SampleRecord for &T {
    fn x(&self) -> u32 {
        (**self).x()
    }

    fn y(&self) -> u32 {
        (**self).y()
    }

    fn z(&self) -> f64 {
        (**self).z()
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "x [mm]")]
    x: f64,
    #[serde(rename = "y [mm]")]
    y: f64,
    #[serde(rename = "z [mm]", alias = "z")]
    z: f64,
}

/// Read samples from a sample log on disk.
pub fn read_samples_csv(path: impl AsRef<Path>) -> ScanResult<Vec<Sample>> {
    let file = std::fs::File::open(path.as_ref())?;
    read_samples(file)
}

/// Read samples from any CSV source with `x [mm]`, `y [mm]` and `z [mm]` (or `z`) columns.
///
/// Coordinates must be non-negative integers (they may be written as `3` or
/// `3.0`). Rows are numbered from 1, excluding the header.
pub fn read_samples<R: Read>(source: R) -> ScanResult<Vec<Sample>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let mut samples = Vec::new();
    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = index + 1;
        let record = result.map_err(|e| ScanError::MalformedRecord {
            row,
            reason: e.to_string(),
        })?;
        samples.push(Sample {
            x: coordinate(record.x, "x", row)?,
            y: coordinate(record.y, "y", row)?,
            z: finite(record.z, row)?,
        });
    }
    Ok(samples)
}

/// Parse one streamed `x,y,z` line.
///
/// The protocol never validates records; callers that want validation (for
/// example a live preview) can use this.
pub fn parse_record(line: &str, row: usize) -> ScanResult<Sample> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [x, y, z] = fields.as_slice() else {
        return Err(ScanError::MalformedRecord {
            row,
            reason: format!("expected 3 comma-separated fields, got {}", fields.len()),
        });
    };

    let number = |text: &str, axis: &str| -> ScanResult<f64> {
        text.parse::<f64>().map_err(|_| ScanError::MalformedRecord {
            row,
            reason: format!("{} value '{}' is not a number", axis, text),
        })
    };

    Ok(Sample {
        x: coordinate(number(*x, "x")?, "x", row)?,
        y: coordinate(number(*y, "y")?, "y", row)?,
        z: finite(number(*z, "z")?, row)?,
    })
}

fn coordinate(value: f64, axis: &str, row: usize) -> ScanResult<u32> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(ScanError::MalformedRecord {
            row,
            reason: format!(
                "{} coordinate {} is not a non-negative integer millimeter",
                axis, value
            ),
        });
    }
    Ok(value as u32)
}

fn finite(value: f64, row: usize) -> ScanResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ScanError::MalformedRecord {
            row,
            reason: format!("z value {} is not finite", value),
        })
    }
}
