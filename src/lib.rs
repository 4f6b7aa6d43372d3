//! # Surface DAQ Core Library
//!
//! Acquisition and analysis of surface height scans taken by a serial range
//! sensor on an x/y stage. The `surface_daq` binary is a thin CLI over this
//! library.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered settings (defaults, TOML file, environment) loaded with figment.
//!   See `config::Settings`.
//! - **`logging`**: tracing subscriber setup (pretty, compact or JSON output).
//! - **`error`**: The `ScanError` enum used across the crate.
//! - **`transport`**: The `LineTransport` trait with a serial port implementation and a
//!   simulated device for tests.
//! - **`protocol`**: Message catalog and the acquisition `Session` (handshake, configuration,
//!   start, streaming until the close sentinel).
//! - **`data`**: Recorders that persist the stream, the sample-log reader and the grid
//!   reconstructor.
//! - **`analysis`**: Center of mass, spline-integral volume, and energy helpers.
//!
//! ## Example
//!
//! ```
//! use surface_daq::analysis::{center_of_mass, volume, spline::SplineDegree};
//! use surface_daq::data::grid::GridReconstructor;
//!
//! let samples = [(0u32, 0u32, 46.0), (1, 0, 46.0), (0, 1, 46.0), (1, 1, 46.0)];
//! let grid = GridReconstructor::new(50.0).reconstruct(samples).unwrap();
//!
//! let com = center_of_mass(&grid).unwrap();
//! assert_eq!((com.x, com.y, com.z), (0.5, 0.5, 2.0));
//! assert!((volume(&grid, SplineDegree::Cubic).unwrap() - 16.0).abs() < 1e-9);
//! ```

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod transport;
