use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::Deserialize;

use crate::{sga::MemPoolOptions, Result};

/// The I/O declaration type that asks for a queue on a physical network device.
pub const NETWORK_Q: &str = "NETWORK_Q";

/// The application configuration document.
///
/// ```yaml
/// service_units:
///   - io:
///       - type: NETWORK_Q
///         device_id: 0
///   - - type: NETWORK_Q
///       device_id: 1
/// log_dir: /var/log/app
/// mempool:
///   buffers: 4096
///   buffer_size: 2048
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct QioConfig {
    pub service_units: Vec<ServiceUnitConfig>,
    pub log_dir: PathBuf,
    #[serde(default)]
    pub mempool: MemPoolOptions,
}

/// One service unit entry, either a bare list of I/O declarations or a map carrying them under
/// `io`. Other keys of the map form are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServiceUnitConfig {
    Io { io: Vec<IoDecl> },
    Decls(Vec<IoDecl>),
}

impl ServiceUnitConfig {
    pub fn decls(&self) -> &[IoDecl] {
        match self {
            ServiceUnitConfig::Io { io } => io,
            ServiceUnitConfig::Decls(decls) => decls,
        }
    }
}

/// A single I/O declaration of a service unit.
#[derive(Debug, Clone, Deserialize)]
pub struct IoDecl {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub device_id: Option<u16>,
}

impl IoDecl {
    pub fn is_network(&self) -> bool {
        self.kind == NETWORK_Q
    }
}

impl QioConfig {
    /// Load and deserialize the YAML document at `path`.
    pub fn load(path: &Path) -> Result<QioConfig> {
        let raw = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .build()?;
        Ok(raw.try_deserialize()?)
    }

    /// Deserialize an in memory YAML document.
    pub fn from_yaml_str(doc: &str) -> Result<QioConfig> {
        let raw = Config::builder()
            .add_source(File::from_str(doc, FileFormat::Yaml))
            .build()?;
        Ok(raw.try_deserialize()?)
    }
}
