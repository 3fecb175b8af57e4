//! Debugger lifecycle: bootstrap, control endpoints, transport worker and local handlers.

use crate::bootstrap::{self, Bootstrap, BootstrapState};
use crate::config::{DebuggerConfig, Settings};
use crate::error::Error;
use crate::interpreter::{Interpreter, ShellChannel};
use crate::log::FileTracer;
use crate::protocol::{DapRequest, DapResponse};
use crate::rich;
use crate::router::{self, Forward, Handler, HandlerTable};
use crate::threads::ThreadTracker;
use crate::tmp;
use crate::transport::client::{HANDSHAKE_ACK, HANDSHAKE_REQUEST};
use crate::transport::{
    Context, DEBUGGER_CHANNEL, DEBUGGER_HEADER_CHANNEL, DapTcpClient, Endpoints, EventCallback,
    Socket, WorkerHandle, controller_endpoint, publisher_endpoint,
};
use crate::weak_error;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Address of the external adapter and the configuration it is started with.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugSession {
    pub host: String,
    pub port: u16,
    pub config: DebuggerConfig,
}

impl DebugSession {
    pub fn adapter_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Capabilities announced to the front end in the `debugInfo` reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggerInfo {
    pub hash_method: &'static str,
    pub hash_seed: u32,
    pub tmp_file_prefix: String,
    pub tmp_file_suffix: String,
    pub exception_breakpoints: bool,
    pub exception_paths: Vec<String>,
    /// The front end asks for `richInspectVariables` only if set.
    pub rich_rendering: bool,
}

impl DebuggerInfo {
    /// Capabilities of the current process.
    pub fn current() -> Self {
        Self {
            hash_method: tmp::HASH_METHOD,
            hash_seed: tmp::HASH_SEED,
            tmp_file_prefix: tmp::tmp_prefix(),
            tmp_file_suffix: tmp::tmp_suffix().to_string(),
            exception_breakpoints: true,
            exception_paths: vec!["Python Exceptions".to_string()],
            rich_rendering: true,
        }
    }
}

pub struct DebuggerBuilder {
    settings: Settings,
    config: DebuggerConfig,
    context: Context,
    bootstrap: &'static Bootstrap,
    port: Option<u16>,
}

impl Default for DebuggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DebuggerBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            config: DebuggerConfig::default(),
            context: Context::new(),
            bootstrap: Bootstrap::global(),
            port: None,
        }
    }

    pub fn with_settings(self, settings: Settings) -> Self {
        Self { settings, ..self }
    }

    pub fn with_config(self, config: DebuggerConfig) -> Self {
        Self { config, ..self }
    }

    /// Use an existing socket context, the kernel control endpoints live in it.
    pub fn with_context(self, context: Context) -> Self {
        Self { context, ..self }
    }

    /// Track the external adapter start in `bootstrap` instead of the process-wide state.
    pub fn with_bootstrap(self, bootstrap: &'static Bootstrap) -> Self {
        Self { bootstrap, ..self }
    }

    /// Use a fixed adapter port instead of probing the configured range.
    pub fn with_port(self, port: u16) -> Self {
        Self {
            port: Some(port),
            ..self
        }
    }

    pub fn build(
        self,
        interpreter: Arc<dyn Interpreter>,
        shell: Arc<dyn ShellChannel>,
    ) -> Result<Debugger, Error> {
        let settings = self.settings;
        let port = match self.port {
            Some(port) => port,
            None => bootstrap::find_free_port(
                &settings.host,
                settings.port_max_tries,
                settings.port_range_start,
                settings.port_range_end,
            )?,
        };
        let tracer = FileTracer::from_env(&settings.log_file);

        Ok(Debugger {
            session: DebugSession {
                host: settings.host.clone(),
                port,
                config: self.config,
            },
            context: self.context,
            settings,
            interpreter,
            shell,
            routes: HandlerTable::new(),
            bootstrap: self.bootstrap,
            threads: Arc::new(ThreadTracker::new()),
            worker: None,
            tracer,
        })
    }
}

pub struct Debugger {
    context: Context,
    settings: Settings,
    session: DebugSession,
    interpreter: Arc<dyn Interpreter>,
    shell: Arc<dyn ShellChannel>,
    routes: HandlerTable,
    bootstrap: &'static Bootstrap,
    threads: Arc<ThreadTracker>,
    worker: Option<WorkerHandle>,
    tracer: Option<FileTracer>,
}

impl Debugger {
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn session(&self) -> &DebugSession {
        &self.session
    }

    pub fn routes(&self) -> &HandlerTable {
        &self.routes
    }

    pub fn threads(&self) -> &ThreadTracker {
        &self.threads
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        self.bootstrap.state()
    }

    pub fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    /// Start a debug session.
    ///
    /// Starts the external adapter if it is not started yet, binds the control endpoints,
    /// runs the transport worker and waits until it is connected to the adapter. Return
    /// `false` without binding anything if the external adapter can't be started.
    pub fn start(&mut self, header: &mut Socket, request: &mut Socket) -> Result<bool, Error> {
        if self.is_started() {
            return Ok(true);
        }

        fs::create_dir_all(tmp::log_directory())?;

        let session = &self.session;
        let shell = &*self.shell;
        let tracer = self.tracer.as_ref();
        let state = self.bootstrap.ensure(|| {
            bootstrap::start_external_adapter(
                shell,
                &session.host,
                session.port,
                &session.config,
                tracer,
            )
        });
        if state != BootstrapState::Started {
            warn!(target: "nbdap", "debugger is unavailable: external adapter {state}");
            return Ok(false);
        }

        fs::create_dir_all(tmp::tmp_prefix())?;
        request.bind(&controller_endpoint(DEBUGGER_CHANNEL))?;
        if let Err(e) = header.bind(&controller_endpoint(DEBUGGER_HEADER_CHANNEL)) {
            weak_error!(request.unbind(&controller_endpoint(DEBUGGER_CHANNEL)));
            return Err(e);
        }

        if let Err(e) = self.spawn_worker(request) {
            weak_error!(self.stop(header, request), "rollback failed session start:");
            return Err(e);
        }

        info!(target: "nbdap", "debug session started, adapter at {}", self.session.adapter_address());
        Ok(true)
    }

    fn spawn_worker(&mut self, request: &Socket) -> Result<(), Error> {
        let threads = self.threads.clone();
        let callback: EventCallback = Arc::new(move |event: &Value| threads.observe(event));
        let client = DapTcpClient::new(
            self.context.clone(),
            self.settings.connect_timeout(),
            callback,
            self.tracer.clone(),
        );
        let endpoints = Endpoints {
            adapter: self.session.adapter_address(),
            publisher: publisher_endpoint(),
            controller: controller_endpoint(DEBUGGER_CHANNEL),
            controller_header: controller_endpoint(DEBUGGER_HEADER_CHANNEL),
        };
        self.worker = Some(WorkerHandle::spawn(client, endpoints)?);

        request.send(HANDSHAKE_REQUEST.to_vec())?;
        let reply = request.recv_timeout(self.settings.handshake_timeout())?;
        if reply != HANDSHAKE_ACK {
            return Err(Error::AdapterUnreachable(self.session.adapter_address()));
        }
        debug!(target: "nbdap", "transport worker is ready");
        Ok(())
    }

    /// Stop the debug session: unbind the control endpoints and wait for the transport
    /// worker. Stopping a stopped session does nothing.
    pub fn stop(&mut self, header: &mut Socket, request: &mut Socket) -> Result<(), Error> {
        request.unbind(&controller_endpoint(DEBUGGER_CHANNEL))?;
        header.unbind(&controller_endpoint(DEBUGGER_HEADER_CHANNEL))?;

        if let Some(worker) = self.worker.take() {
            weak_error!(
                worker.wait(self.settings.shutdown_timeout()),
                "transport worker:"
            );
        }
        self.threads.clear();
        Ok(())
    }

    pub fn debugger_info(&self) -> DebuggerInfo {
        DebuggerInfo::current()
    }

    pub fn cell_temporary_file(&self, code: &str) -> PathBuf {
        tmp::cell_tmp_file(code)
    }

    /// Run a local handler. Always produce a reply.
    pub fn handle(&self, handler: Handler, req: &DapRequest, forward: &mut dyn Forward) -> Value {
        match handler {
            Handler::InspectVariables => {
                router::inspect_variables(&*self.interpreter, req).into_value()
            }
            Handler::RichInspectVariables => rich::rich_inspect_variables(
                &*self.interpreter,
                forward,
                self.threads.has_stopped(),
                req,
            )
            .map(DapResponse::into_value)
            .unwrap_or_else(|e| failed(req, e)),
            Handler::Attach => {
                router::attach(&self.session.host, self.session.port, forward, req)
                    .unwrap_or_else(|e| failed(req, e))
            }
            Handler::ConfigurationDone => router::configuration_done(req).into_value(),
        }
    }
}

fn failed(req: &DapRequest, e: Error) -> Value {
    warn!(target: "nbdap", "`{}` failed: {e:#}", req.command);
    DapResponse::error(req, e).into_value()
}
