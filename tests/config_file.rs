// Loading configuration files from disk

use shui_rs::config::{ConfigError, load_config};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_config_from_file() {
    let file = write_config(
        r#"
        [printer]
        host = "192.168.0.42"
        name = "Two Trees Bluer"

        [client]
        failures_to_disconnect = 5
        poll_interval_secs = 10
        "#,
    );

    let config = load_config(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.endpoint().to_string(), "192.168.0.42:8080");
    assert_eq!(config.client.failures_to_disconnect, 5);
    assert_eq!(config.poll_interval().as_secs(), 10);
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = load_config(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_broken_toml_is_a_parse_error() {
    let file = write_config("[printer\nhost = ");
    let err = load_config(file.path().to_str().unwrap()).unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}

#[test]
fn test_invalid_values_are_rejected_on_load() {
    let file = write_config("[printer]\nport = 0\n");
    let err = load_config(file.path().to_str().unwrap()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_zero_poll_interval_is_rejected_on_load() {
    let file = write_config("[client]\npoll_interval_secs = 0\n");
    let err = load_config(file.path().to_str().unwrap()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("poll_interval_secs")));
}
