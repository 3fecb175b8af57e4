use anyhow::Context;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Environment variable that enables the diagnostic file.
pub const LOG_ENV_VAR: &str = "NBDAP_LOG";

/// Return `true` if the diagnostic file is requested by the environment.
pub fn diagnostics_enabled() -> bool {
    std::env::var_os(LOG_ENV_VAR).is_some()
}

/// Simple append-only file tracer for adapter diagnostics.
#[derive(Clone)]
pub struct FileTracer {
    file: Arc<Mutex<std::fs::File>>,
}

impl FileTracer {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Open a tracer at `path` only if [`LOG_ENV_VAR`] is set.
    pub fn from_env(path: &Path) -> Option<Self> {
        if !diagnostics_enabled() {
            return None;
        }
        crate::weak_error!(Self::new(path), "diagnostic file disabled:")
    }

    pub fn line(&self, text: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{text}");
        }
    }
}
