//! Rig configuration loading from disk and the environment.

use std::io::Write;

use chamelium::{ChameliumConfig, ConfigError};

const RIG: &str = "\
[Chamelium]
URL=http://192.168.1.2:9992

[Chamelium:DP-1]
ChameliumPortID=1

[Chamelium:HDMI-A-1]
ChameliumPortID=3
";

#[test]
fn config_loads_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(RIG.as_bytes()).unwrap();

    let config = ChameliumConfig::load(file.path()).unwrap();
    assert_eq!(config.url, "http://192.168.1.2:9992");
    assert_eq!(config.mappings.len(), 2);
    assert_eq!(config.mappings[1].connector_name, "HDMI-A-1");
    assert_eq!(config.mappings[1].port_id, 3);
}

#[test]
fn missing_file_reports_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let err = ChameliumConfig::load(&dir.path().join("nonexistent.ini")).unwrap_err();
    match err {
        ConfigError::Io { path, .. } => {
            assert!(path.ends_with("nonexistent.ini"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn load_default_reads_the_environment_variable() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(RIG.as_bytes()).unwrap();

    std::env::set_var("CHAMELIUM_CONFIG", file.path());
    let config = ChameliumConfig::load_default().unwrap();
    std::env::remove_var("CHAMELIUM_CONFIG");

    assert_eq!(config.url, "http://192.168.1.2:9992");
}
