//! Rig configuration: where the appliance lives and which of its ports is
//! cabled to which DUT connector.
//!
//! The file is a small key-file dialect:
//!
//! ```text
//! [Chamelium]
//! URL=http://192.168.1.2:9992
//!
//! [Chamelium:HDMI-A-1]
//! ChameliumPortID=3
//! ```
//!
//! Sections other than `[Chamelium]` and `[Chamelium:<name>]` are ignored so
//! the file can be shared with other tooling.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration file found; set CHAMELIUM_CONFIG or pass a path")]
    Missing,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration line {line:?}")]
    BadLine { line: String },

    #[error("configuration has no [Chamelium] section")]
    MissingSection,

    #[error("[Chamelium] section has no URL key")]
    MissingUrl,

    #[error("port section for {name:?} has no ChameliumPortID key")]
    MissingPortId { name: String },

    #[error("port section for {name:?} has unparseable ChameliumPortID {value:?}")]
    BadPortId { name: String, value: String },

    #[error("port id {0} is mapped to more than one connector")]
    DuplicatePort(String),

    #[error("connector {0:?} has more than one port section")]
    DuplicateConnector(String),
}

/// One `[Chamelium:<name>]` section: an appliance port cabled to a named DUT
/// connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub connector_name: String,
    pub port_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChameliumConfig {
    pub url: String,
    pub mappings: Vec<PortMapping>,
}

impl ChameliumConfig {
    /// Parses configuration text. The `[Chamelium]` section with a `URL` key
    /// is mandatory; port sections are optional (the session can also map
    /// ports by autodiscovery later).
    pub fn parse(text: &str) -> Result<ChameliumConfig, ConfigError> {
        let mut url = None;
        let mut mappings: Vec<PortMapping> = Vec::new();
        let mut saw_main = false;
        let mut section = Section::Other;

        for raw in text.lines() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(inner) = line.strip_prefix('[') {
                let Some(name) = inner.strip_suffix(']') else {
                    return Err(ConfigError::BadLine {
                        line: raw.to_string(),
                    });
                };
                section = if name == "Chamelium" {
                    saw_main = true;
                    Section::Main
                } else if let Some(connector) = name.strip_prefix("Chamelium:") {
                    if mappings.iter().any(|m| m.connector_name == connector) {
                        return Err(ConfigError::DuplicateConnector(connector.to_string()));
                    }
                    mappings.push(PortMapping {
                        connector_name: connector.to_string(),
                        port_id: -1,
                    });
                    Section::Port(mappings.len() - 1)
                } else {
                    Section::Other
                };
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::BadLine {
                    line: raw.to_string(),
                });
            };
            let (key, value) = (key.trim(), value.trim());
            match section {
                Section::Main => {
                    if key == "URL" {
                        url = Some(value.trim_end_matches('/').to_string());
                    }
                }
                Section::Port(idx) => {
                    if key == "ChameliumPortID" {
                        let mapping = &mut mappings[idx];
                        let id: i32 =
                            value.parse().map_err(|_| ConfigError::BadPortId {
                                name: mapping.connector_name.clone(),
                                value: value.to_string(),
                            })?;
                        // Port ids are nonnegative; -1 is the internal
                        // "not seen yet" sentinel.
                        if id < 0 {
                            return Err(ConfigError::BadPortId {
                                name: mapping.connector_name.clone(),
                                value: value.to_string(),
                            });
                        }
                        mapping.port_id = id;
                    }
                }
                Section::Other => {}
            }
        }

        if !saw_main {
            return Err(ConfigError::MissingSection);
        }
        let url = url.ok_or(ConfigError::MissingUrl)?;
        for mapping in &mappings {
            if mapping.port_id < 0 {
                return Err(ConfigError::MissingPortId {
                    name: mapping.connector_name.clone(),
                });
            }
        }
        for (i, a) in mappings.iter().enumerate() {
            if mappings[..i].iter().any(|b| b.port_id == a.port_id) {
                return Err(ConfigError::DuplicatePort(a.port_id.to_string()));
            }
        }

        Ok(ChameliumConfig { url, mappings })
    }

    pub fn load(path: &Path) -> Result<ChameliumConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        ChameliumConfig::parse(&text)
    }

    /// Loads the file named by `CHAMELIUM_CONFIG`. Absence of the variable is
    /// [`ConfigError::Missing`] so callers can tell "not set up for this rig"
    /// apart from a broken file.
    pub fn load_default() -> Result<ChameliumConfig, ConfigError> {
        match std::env::var_os("CHAMELIUM_CONFIG") {
            Some(path) => ChameliumConfig::load(Path::new(&path)),
            None => Err(ConfigError::Missing),
        }
    }
}

#[derive(Clone, Copy)]
enum Section {
    Main,
    Port(usize),
    Other,
}

/// Strips `#`/`;` comment lines and trailing ` #` comments; a `#` glued to
/// preceding content is part of the value.
fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') || trimmed.starts_with(';') {
        return "";
    }
    match line.find(" #") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

impl fmt::Display for ChameliumConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} mapped ports)", self.url, self.mappings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_and_port_mappings() {
        let config = ChameliumConfig::parse(
            "# rig config\n\
             [Chamelium]\n\
             URL=http://192.168.1.2:9992/\n\
             \n\
             [Chamelium:DP-1]\n\
             ChameliumPortID=1\n\
             [Chamelium:HDMI-A-1]\n\
             ChameliumPortID=3\n",
        )
        .unwrap();
        assert_eq!(config.url, "http://192.168.1.2:9992");
        assert_eq!(
            config.mappings,
            vec![
                PortMapping {
                    connector_name: "DP-1".to_string(),
                    port_id: 1,
                },
                PortMapping {
                    connector_name: "HDMI-A-1".to_string(),
                    port_id: 3,
                },
            ]
        );
    }

    #[test]
    fn unknown_sections_are_ignored() {
        let config = ChameliumConfig::parse(
            "[DUT]\n\
             SomeKey=SomeValue\n\
             [Chamelium]\n\
             URL=http://localhost:9992\n",
        )
        .unwrap();
        assert!(config.mappings.is_empty());
    }

    #[test]
    fn missing_section_url_and_port_id_are_distinct_errors() {
        assert!(matches!(
            ChameliumConfig::parse("[DUT]\nx=y\n"),
            Err(ConfigError::MissingSection)
        ));
        assert!(matches!(
            ChameliumConfig::parse("[Chamelium]\n"),
            Err(ConfigError::MissingUrl)
        ));
        assert!(matches!(
            ChameliumConfig::parse("[Chamelium]\nURL=http://x\n[Chamelium:DP-1]\n"),
            Err(ConfigError::MissingPortId { .. })
        ));
    }

    #[test]
    fn duplicate_port_ids_are_rejected() {
        let err = ChameliumConfig::parse(
            "[Chamelium]\n\
             URL=http://x\n\
             [Chamelium:DP-1]\n\
             ChameliumPortID=2\n\
             [Chamelium:DP-2]\n\
             ChameliumPortID=2\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePort(_)));
    }

    #[test]
    fn duplicate_connector_sections_are_rejected() {
        let err = ChameliumConfig::parse(
            "[Chamelium]\n\
             URL=http://x\n\
             [Chamelium:DP-1]\n\
             ChameliumPortID=1\n\
             [Chamelium:DP-1]\n\
             ChameliumPortID=2\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateConnector(_)));
    }

    #[test]
    fn negative_port_ids_are_rejected_as_unparseable() {
        let err = ChameliumConfig::parse(
            "[Chamelium]\n\
             URL=http://x\n\
             [Chamelium:DP-1]\n\
             ChameliumPortID=-5\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadPortId { .. }));
    }

    #[test]
    fn inline_comments_are_stripped() {
        let config = ChameliumConfig::parse(
            "[Chamelium]\n\
             URL=http://localhost:9992 # local simulator\n",
        )
        .unwrap();
        assert_eq!(config.url, "http://localhost:9992");
    }
}
