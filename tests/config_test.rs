use picamstream::config::StreamConfig;
use picamstream::types::Resolution;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("picamstream.toml");

    let mut config = StreamConfig::default();
    config.camera.resolution = [1920, 1080];
    config.camera.rotation = 180;
    config.reconnect.error_threshold = 4;
    config.backends.enabled = vec!["v4l2".to_string(), "auto".to_string()];
    config.save_to_file(&path).unwrap();

    let loaded = StreamConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded.capture_config().resolution, Resolution::new(1920, 1080));
    assert_eq!(loaded.camera.rotation, 180);
    assert_eq!(loaded.session_timing().error_threshold, 4);
    assert_eq!(loaded.backends.enabled, vec!["v4l2", "auto"]);
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let config = StreamConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.camera.resolution, [1280, 720]);
    assert_eq!(config.backends.enabled, vec!["rpicam", "v4l2", "auto"]);
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "this is [not toml").unwrap();
    assert!(StreamConfig::load_from_file(&path).is_err());
}

#[test]
fn test_invalid_values_are_rejected_on_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rotation.toml");

    let mut config = StreamConfig::default();
    config.camera.rotation = 45;
    config.save_to_file(&path).unwrap();

    let err = StreamConfig::load_from_file(&path).unwrap_err();
    assert!(err.to_string().contains("Rotation"));
}

#[test]
fn test_timing_conversion() {
    let mut config = StreamConfig::default();
    config.reconnect.reconnect_delay_ms = 250;
    config.stream.pacing_ms = 5;
    let timing = config.session_timing();
    assert_eq!(timing.reconnect_delay, Duration::from_millis(250));
    assert_eq!(timing.pacing, Duration::from_millis(5));
    assert_eq!(timing.capture_timeout, Duration::from_secs(5));
}
