use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use vitals_core::app::{Config, ConfigError, LogLevel, OutputTarget};
use vitals_core::domain::HrSource;
use vitals_core::stream::StreamFormat;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
hr_source = "ppg"
stream_format = "legacy"
queue_capacity = 1024
log_level = "debug"
sim_heart_rate_bpm = 60
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.hr_source, HrSource::Ppg);
    assert_eq!(config.stream_format, StreamFormat::Legacy);
    assert_eq!(config.queue_capacity, 1024);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.synthetic_config().heart_rate_bpm, 60);

    // Untouched fields fall back to defaults, derived fields are filled in
    assert_eq!(config.sampling_rate_hz, 128);
    assert_eq!(config.drain_stall_timeout, Duration::from_millis(500));
    assert_eq!(config.config_file.as_deref(), Some(file.path()));
}

#[test]
fn test_file_with_invalid_values_rejected() {
    let file = write_config("ring_buffer_size = 16\n");
    assert!(matches!(
        Config::from_file(file.path()),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_malformed_file_is_parse_error() {
    let file = write_config("queue_capacity = \"lots\"\n");
    assert!(matches!(
        Config::from_file(file.path()),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_missing_file_is_file_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Config::from_file(dir.path().join("absent.toml")),
        Err(ConfigError::FileError(_))
    ));
}

#[test]
#[serial]
fn test_cli_overrides_file_and_file_fills_rest() {
    let dir = tempfile::tempdir().unwrap();
    let stream_path = dir.path().join("out.bin");
    let file = write_config(&format!(
        "output = \"file\"\noutput_path = {:?}\nqueue_capacity = 1024\nhr_source = \"ppg\"\n",
        stream_path.display().to_string()
    ));

    let config = Config::from_args_and_env([
        "vitals-core".to_string(),
        "--config-file".to_string(),
        file.path().display().to_string(),
        "--queue-capacity".to_string(),
        "64".to_string(),
    ])
    .unwrap();

    assert_eq!(config.queue_capacity, 64);
    assert_eq!(config.hr_source, HrSource::Ppg);
    assert_eq!(config.output, OutputTarget::File);
    assert_eq!(config.output_path.as_deref(), Some(stream_path.as_path()));
}

#[test]
#[serial]
fn test_environment_variables_are_read() {
    // SAFETY: serialised with the other environment-touching tests
    unsafe {
        std::env::set_var("VITALS_HR_SOURCE", "ppg");
        std::env::set_var("VITALS_RUN_DURATION_SECS", "3");
    }

    let result = Config::from_args_and_env(["vitals-core"]);

    unsafe {
        std::env::remove_var("VITALS_HR_SOURCE");
        std::env::remove_var("VITALS_RUN_DURATION_SECS");
    }

    let config = result.unwrap();
    assert_eq!(config.hr_source, HrSource::Ppg);
    assert_eq!(config.run_duration, Some(Duration::from_secs(3)));
}

#[test]
#[serial]
fn test_unknown_cli_value_rejected() {
    assert!(matches!(
        Config::from_args(["vitals-core", "--hr-source", "spo2"]),
        Err(ConfigError::InvalidConfig(_))
    ));
}
