use mdaq_core::config::{ConfigError, SessionConfig};
use mdaq_core::protocol::{ItemWidth, Model, ProtocolError, Session};
use mdaq_core::spectrum::SpectrumFormat;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "port_name": "/dev/ttyS0",
            "model": "mdaq107",
            "bulk_timeout_ms": 2500,
            "acquisition": {{ "format": {{ "binary": "one" }}, "cycles_per_burst": 200 }}
        }}"#
    )
    .unwrap();

    let config = SessionConfig::from_file(file.path()).unwrap();
    assert_eq!(config.port_name, "/dev/ttyS0");
    assert_eq!(config.model, Model::Mdaq107);
    assert_eq!(config.timeouts().command, Duration::from_secs(2));
    assert_eq!(config.timeouts().bulk, Duration::from_millis(2500));
    assert_eq!(
        config.acquisition.format,
        SpectrumFormat::Binary(ItemWidth::One)
    );
    assert_eq!(config.acquisition.cycles_per_burst, 200);
    assert_eq!(config.acquisition.poll_interval_ms, 10);
}

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mdaq.json");
    let mut config = SessionConfig::new("COM4", Model::Mdaq209);
    config.timeout_ms = Some(1500);

    config.save(&path).unwrap();
    assert_eq!(SessionConfig::from_file(&path).unwrap(), config);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        SessionConfig::from_file(dir.path().join("absent.json")),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn test_unknown_model_rejected() {
    let result = SessionConfig::from_json(r#"{ "port_name": "x", "model": "mdaq300" }"#);
    assert!(matches!(result, Err(ConfigError::Json(_))));
}

#[test]
fn test_open_missing_port() {
    let config = SessionConfig::new("/dev/mdaq-port-that-does-not-exist", Model::Mdaq209);
    assert!(matches!(
        Session::open(&config),
        Err(ProtocolError::PortUnavailable { .. })
    ));
}
