//! End-to-end acquisition and analysis against a simulated device
//!
//! Runs a full session over `MockDevice`, persists the stream with
//! `CsvRecorder`, reads the log back and analyzes the reconstructed grid.

use chrono::Local;
use std::fs;
use surface_daq::analysis::{bar_volume, center_of_mass, spline::SplineDegree, volume};
use surface_daq::config::{ScanConfiguration, Settings};
use surface_daq::data::grid::{GridReconstructor, SurfaceGrid};
use surface_daq::data::sample::read_samples_csv;
use surface_daq::data::storage::{load_sidecar, CsvRecorder, MemoryRecorder};
use surface_daq::error::ScanError;
use surface_daq::protocol::{Session, SessionState, SessionTiming};
use surface_daq::transport::MockDevice;
use tempfile::tempdir;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
}

// =============================================================================
// Full pipeline
// =============================================================================

#[test]
fn test_flat_surface_scan_to_analysis() {
    let dir = tempdir().unwrap();
    let device = MockDevice::new().confirm_on_request(3).with_surface(|_, _| 46.0);
    let recorder = CsvRecorder::create(dir.path().join("Data"), Local::now()).unwrap();
    let configuration = ScanConfiguration::new(4.0, 2.0, 1.0, 1.0)
        .with_metadata("sphere_diameter_mm", serde_json::json!(40.0));

    let mut session = Session::new(device.clone(), recorder, configuration.clone())
        .with_timing(SessionTiming::immediate());
    let summary = session.run().unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(summary.handshake_attempts, 3);
    assert_eq!(summary.records, 15);
    assert_eq!(device.received_configuration(), vec![4.0, 2.0, 1.0, 1.0]);
    assert_eq!(device.pending_lines(), 0);

    let (_, recorder) = session.into_parts();
    let log = fs::read_to_string(recorder.log_path()).unwrap();
    assert!(log.starts_with("x [mm],y [mm],z [mm]\n"));
    assert_eq!(log.lines().count(), 16);
    assert_eq!(
        load_sidecar(recorder.sidecar_path().unwrap()).unwrap(),
        configuration
    );

    let samples = read_samples_csv(recorder.log_path()).unwrap();
    let grid = GridReconstructor::new(50.0).reconstruct(&samples).unwrap();
    assert_eq!(grid.shape(), (3, 3, 5));

    let com = center_of_mass(&grid).unwrap();
    assert!(close(com.x, 2.0));
    assert!(close(com.y, 1.0));
    assert!(close(com.z, 2.0));

    for degree in [SplineDegree::Linear, SplineDegree::Cubic] {
        assert!(close(volume(&grid, degree).unwrap(), 4.0 * 5.0 * 3.0));
    }
    assert!(close(bar_volume(&grid), 4.0 * 15.0));
}

#[test]
fn test_sloped_surface_volume_matches_closed_form() {
    // z = 50 - (x + y) gives heights x + y.
    let device = MockDevice::new().with_surface(|x, y| 50.0 - (x + y));
    let mut session = Session::new(
        device,
        MemoryRecorder::new(),
        ScanConfiguration::new(5.0, 3.0, 1.0, 1.0),
    )
    .with_timing(SessionTiming::immediate());
    session.run().unwrap();

    let csv = std::iter::once("x [mm],y [mm],z [mm]".to_string())
        .chain(session.recorder().lines().iter().cloned())
        .collect::<Vec<_>>()
        .join("\n");
    let samples = surface_daq::data::sample::read_samples(csv.as_bytes()).unwrap();

    let reconstructor = GridReconstructor::default();
    let dense = reconstructor.reconstruct(&samples).unwrap();
    let sparse = reconstructor.reconstruct_sparse(&samples).unwrap();
    assert_eq!((dense.rows(), dense.cols()), (4, 6));

    let (h, w) = (4.0, 6.0);
    let expected = h * w * w / 2.0 + w * h * h / 2.0;
    assert!(close(volume(&dense, SplineDegree::Cubic).unwrap(), expected));
    assert!(close(volume(&sparse, SplineDegree::Linear).unwrap(), expected));
    assert_eq!(center_of_mass(&dense).unwrap(), center_of_mass(&sparse).unwrap());
}

// =============================================================================
// Failure paths
// =============================================================================

#[test]
fn test_unplugged_device_reports_closed_channel() {
    let dir = tempdir().unwrap();
    let device = MockDevice::new()
        .with_records(["0,0,48.0", "1,0,47.5"])
        .without_close();
    let recorder = CsvRecorder::create(dir.path(), Local::now()).unwrap();

    let mut session = Session::new(device, recorder, ScanConfiguration::default())
        .with_timing(SessionTiming::immediate());
    let result = session.run();
    assert!(matches!(result, Err(ScanError::TransportClosed)));

    // Records received before the disconnect are on disk.
    let (_, recorder) = session.into_parts();
    let samples = read_samples_csv(recorder.log_path()).unwrap();
    assert_eq!(samples.len(), 2);
}

#[test]
fn test_settings_bound_the_handshake() {
    let mut settings = Settings::default();
    settings.serial.boot_delay_ms = 0;
    settings.serial.start_delay_ms = 0;
    settings.serial.handshake_max_attempts = Some(4);

    let device = MockDevice::new().never_confirm();
    let mut session = Session::from_settings(device.clone(), MemoryRecorder::new(), &settings);

    assert!(matches!(
        session.run(),
        Err(ScanError::HandshakeExhausted { attempts: 4 })
    ));
    assert_eq!(device.requests_seen(), 4);
    assert!(session.recorder().configuration().is_none());
}

#[test]
fn test_empty_log_cannot_be_analyzed() {
    let dir = tempdir().unwrap();
    let recorder_dir = dir.path().join("Data");
    let device = MockDevice::new();
    let recorder = CsvRecorder::create(&recorder_dir, Local::now()).unwrap();

    let mut session = Session::new(device, recorder, ScanConfiguration::default())
        .with_timing(SessionTiming::immediate());
    assert_eq!(session.run().unwrap().records, 0);

    let (_, recorder) = session.into_parts();
    let samples = read_samples_csv(recorder.log_path()).unwrap();
    assert!(matches!(
        GridReconstructor::default().reconstruct(&samples),
        Err(ScanError::EmptyInput)
    ));
}
