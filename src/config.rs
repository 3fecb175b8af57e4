use crate::{muted_error, weak_error};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::read_to_string;
use std::path::PathBuf;
use std::time::Duration;

/// Debugger configuration handed over by the kernel.
///
/// Only the `python` key (an interpreter executable override for the external adapter) is
/// interpreted, all other options are kept as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebuggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl DebuggerConfig {
    pub fn from_json(value: &Value) -> Self {
        weak_error!(
            serde_json::from_value::<DebuggerConfig>(value.clone()),
            "ignore invalid debugger config:"
        )
        .unwrap_or_default()
    }
}

/// Adapter tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Host the external adapter listens on.
    pub host: String,
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Number of random ports probed before giving up.
    pub port_max_tries: usize,
    /// Wait for the transport worker readiness on session start.
    pub handshake_timeout_ms: u64,
    /// Wait for the external adapter reply to a forwarded request.
    pub forward_timeout_ms: u64,
    /// Wait for the external adapter to accept a TCP connection.
    pub connect_timeout_ms: u64,
    /// Wait for the transport worker to finish on session stop.
    pub shutdown_timeout_ms: u64,
    /// Diagnostic file, written only if `NBDAP_LOG` is set.
    pub log_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port_range_start: 5678,
            port_range_end: 5900,
            port_max_tries: 100,
            handshake_timeout_ms: 10_000,
            forward_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            shutdown_timeout_ms: 5_000,
            log_file: PathBuf::from("nbdap.log"),
        }
    }
}

impl Settings {
    const DEFAULT_PATH: &'static str = ".config/nbdap/settings.toml";

    /// Load settings from file. Return [`None`] on errors.
    pub fn from_file(path: Option<&str>) -> Option<Self> {
        let data = match path {
            None => {
                let path = home::home_dir()?;
                let path = path.join(Self::DEFAULT_PATH);
                muted_error!(read_to_string(path))?
            }
            Some(path) => match read_to_string(path) {
                Ok(data) => data,
                Err(err) => {
                    error!(target: "nbdap", "Error while load settings file: {err}");
                    return None;
                }
            },
        };

        weak_error!(toml::de::from_str(&data))
    }

    /// Load settings from file, fall back to defaults.
    pub fn load(path: Option<&str>) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
