//! One-time start of the external debug adapter inside the interpreter.

use crate::config::DebuggerConfig;
use crate::error::{Error, InterpreterError};
use crate::interpreter::ShellChannel;
use crate::log::FileTracer;
use log::{debug, error, info};
use rand::Rng;
use std::net::TcpListener;
use std::sync::Mutex;

/// Lifecycle of the external debug adapter in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum BootstrapState {
    NotStarted,
    Started,
    Failed,
}

/// Process-wide bootstrap state. The start sequence runs at most once, every later call
/// observes the cached outcome.
pub struct Bootstrap {
    state: Mutex<BootstrapState>,
}

static GLOBAL: Bootstrap = Bootstrap::new();

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl Bootstrap {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(BootstrapState::NotStarted),
        }
    }

    /// Bootstrap state of the current process.
    pub fn global() -> &'static Bootstrap {
        &GLOBAL
    }

    pub fn state(&self) -> BootstrapState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Run `start` if the adapter was never started and record its outcome.
    ///
    /// Concurrent callers wait for the first one to finish.
    pub fn ensure(&self, start: impl FnOnce() -> bool) -> BootstrapState {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state == BootstrapState::NotStarted {
            *state = if start() {
                BootstrapState::Started
            } else {
                BootstrapState::Failed
            };
            debug!(target: "nbdap", "bootstrap state: {}", *state);
        }
        *state
    }
}

/// Find a port free for listening on `host`, probing random candidates from
/// `start..=end`.
pub fn find_free_port(host: &str, max_tries: usize, start: u16, end: u16) -> Result<u16, Error> {
    if start > end {
        return Err(Error::NoFreePort(start, end));
    }
    let mut rng = rand::thread_rng();
    for _ in 0..max_tries {
        let port = rng.gen_range(start..=end);
        if TcpListener::bind((host, port)).is_ok() {
            return Ok(port);
        }
    }
    Err(Error::NoFreePort(start, end))
}

/// Interpreter code that loads the external adapter and makes it listen on `host:port`.
pub fn listen_snippet(host: &str, port: u16, config: &DebuggerConfig) -> String {
    let mut code = String::from("import debugpy;");
    if let Some(python) = &config.python {
        code += &format!("debugpy.configure({{'python': r'{python}'}});");
    }
    code += &format!("debugpy.listen(('{host}',{port}))");
    code
}

/// Ask the interpreter to start the external adapter.
pub fn launch(
    shell: &dyn ShellChannel,
    host: &str,
    port: u16,
    config: &DebuggerConfig,
    tracer: Option<&FileTracer>,
) -> Result<(), Error> {
    if let Some(tracer) = tracer {
        tracer.line("===== DEBUGGER CONFIG =====");
        tracer.line(&serde_json::to_string(config)?);
    }

    let code = listen_snippet(host, port, config);
    let reply = shell.execute(&code)?;
    reply.into_result().map_err(Error::Bootstrap)?;
    info!(target: "nbdap", "external debug adapter listens on {host}:{port}");
    Ok(())
}

/// Start the external adapter, log the interpreter exception on failure.
pub fn start_external_adapter(
    shell: &dyn ShellChannel,
    host: &str,
    port: u16,
    config: &DebuggerConfig,
    tracer: Option<&FileTracer>,
) -> bool {
    match launch(shell, host, port, config, tracer) {
        Ok(()) => true,
        Err(Error::Bootstrap(exception)) => {
            report(&exception);
            false
        }
        Err(e) => {
            error!(target: "nbdap", "Unable to start external debug adapter: {e:#}");
            false
        }
    }
}

fn report(exception: &InterpreterError) {
    error!(target: "nbdap", "Exception raised when trying to import debugpy");
    for line in &exception.traceback {
        error!(target: "nbdap", "{line}");
    }
    error!(target: "nbdap", "{} - {}", exception.ename, exception.evalue);
}
