//! Control session of the kernel: owns the control sockets and dispatches debug requests
//! either to a local handler or to the external adapter.

use crate::debugger::Debugger;
use crate::error::Error;
use crate::protocol::{DapRequest, DapResponse};
use crate::router::Forward;
use crate::transport::{Socket, publisher_endpoint};
use crate::weak_error;
use log::{debug, warn};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::time::{Duration, Instant};

/// Forward requests through the bound control sockets and wait for the matching response.
struct SocketForwarder<'a> {
    header: &'a Socket,
    request: &'a Socket,
    parent_header: &'a Value,
    timeout: Duration,
}

impl Forward for SocketForwarder<'_> {
    fn forward(&mut self, request: &Value) -> Result<Value, Error> {
        if !self.request.is_bound() {
            return Err(Error::NotStarted);
        }
        self.header.send(serde_json::to_vec(self.parent_header)?)?;
        self.request.send(serde_json::to_vec(request)?)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let frame = match self.request.recv_timeout(left) {
                Ok(frame) => frame,
                Err(Error::Timeout(_)) => return Err(Error::Timeout(self.timeout)),
                Err(e) => return Err(e),
            };
            let reply: Value = serde_json::from_slice(&frame)?;
            if is_reply_to(&reply, request) {
                return Ok(reply);
            }
            debug!(target: "nbdap", "skip stale response: {reply}");
        }
    }
}

/// A late reply to an abandoned request may share `request_seq` with a later request,
/// so the command must match too.
fn is_reply_to(reply: &Value, request: &Value) -> bool {
    let seq = request.get("seq").and_then(Value::as_i64);
    reply.get("request_seq").and_then(Value::as_i64) == seq
        && reply.get("command").and_then(Value::as_str)
            == request.get("command").and_then(Value::as_str)
}

pub struct ControlSession {
    debugger: Debugger,
    header: Socket,
    request: Socket,
    publisher: Socket,
    /// Last `setBreakpoints` reply per source path.
    breakpoints: BTreeMap<String, Value>,
}

impl ControlSession {
    /// Create a session and bind the event publisher endpoint.
    pub fn new(debugger: Debugger) -> Result<Self, Error> {
        let ctx = debugger.context().clone();
        let mut publisher = ctx.socket();
        publisher.bind(&publisher_endpoint())?;

        Ok(Self {
            header: ctx.socket(),
            request: ctx.socket(),
            publisher,
            debugger,
            breakpoints: BTreeMap::new(),
        })
    }

    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    pub fn start(&mut self) -> Result<bool, Error> {
        self.debugger.start(&mut self.header, &mut self.request)
    }

    pub fn stop(&mut self) -> Result<(), Error> {
        self.breakpoints.clear();
        self.debugger.stop(&mut self.header, &mut self.request)
    }

    /// Wait for the next event published by the transport worker.
    pub fn next_event(&self, timeout: Duration) -> Result<Value, Error> {
        let frame = self.publisher.recv_timeout(timeout)?;
        Ok(serde_json::from_slice(&frame)?)
    }

    /// Process a debug request and return the reply. `header` is the kernel message header
    /// of the request, attached to the events it produces.
    pub fn process_request(&mut self, header: &Value, message: &Value) -> Value {
        let req = match DapRequest::from_value(message) {
            Ok(req) => req,
            Err(e) => {
                warn!(target: "nbdap", "reject request: {e}");
                return DapResponse::error_for_raw(message, e).into_value();
            }
        };

        match req.command.as_str() {
            "debugInfo" => self.debug_info(&req),
            "dumpCell" => self.dump_cell(&req),
            "initialize" => {
                if let Err(e) = self.ensure_started() {
                    return DapResponse::error(&req, e).into_value();
                }
                self.forward(header, &req)
            }
            "setBreakpoints" => {
                let reply = self.forward(header, &req);
                self.record_breakpoints(&req, &reply);
                reply
            }
            "disconnect" => {
                let reply = self.forward(header, &req);
                weak_error!(self.stop(), "stop debug session:");
                reply
            }
            command => match self.debugger.routes().lookup(command) {
                Some(handler) => {
                    if handler.is_user_facing() && !self.debugger.is_started() {
                        return DapResponse::error(&req, Error::NotStarted).into_value();
                    }
                    let mut forwarder = SocketForwarder {
                        header: &self.header,
                        request: &self.request,
                        parent_header: header,
                        timeout: self.debugger.settings().forward_timeout(),
                    };
                    self.debugger.handle(handler, &req, &mut forwarder)
                }
                None => self.forward(header, &req),
            },
        }
    }

    fn ensure_started(&mut self) -> Result<(), Error> {
        if self.debugger.is_started() {
            return Ok(());
        }
        match self.start()? {
            true => Ok(()),
            false => Err(Error::Worker(format!(
                "external debug adapter is {}",
                self.debugger.bootstrap_state()
            ))),
        }
    }

    fn forward(&self, header: &Value, req: &DapRequest) -> Value {
        let mut forwarder = SocketForwarder {
            header: &self.header,
            request: &self.request,
            parent_header: header,
            timeout: self.debugger.settings().forward_timeout(),
        };
        let result =
            serde_json::to_value(req).map_err(Error::from).and_then(|msg| forwarder.forward(&msg));
        match result {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_fatal() {
                    warn!(target: "nbdap", "forward `{}`: {e:#}", req.command);
                } else {
                    debug!(target: "nbdap", "forward `{}`: {e:#}", req.command);
                }
                DapResponse::error(req, e).into_value()
            }
        }
    }

    fn debug_info(&self, req: &DapRequest) -> Value {
        let mut body = match serde_json::to_value(self.debugger.debugger_info()) {
            Ok(Value::Object(body)) => body,
            _ => Default::default(),
        };
        let breakpoints: Vec<Value> = self
            .breakpoints
            .iter()
            .map(|(source, breakpoints)| json!({"source": source, "breakpoints": breakpoints}))
            .collect();
        body.insert("isStarted".to_string(), json!(self.debugger.is_started()));
        body.insert("breakpoints".to_string(), json!(breakpoints));
        body.insert(
            "stoppedThreads".to_string(),
            json!(self.debugger.threads().stopped_threads()),
        );
        DapResponse::success(req, Some(Value::Object(body))).into_value()
    }

    fn dump_cell(&self, req: &DapRequest) -> Value {
        let result = req.str_argument("code").and_then(|code| {
            let path = self.debugger.cell_temporary_file(code);
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(&path, code)?;
            Ok(path)
        });
        match result {
            Ok(path) => DapResponse::success(
                req,
                Some(json!({"sourcePath": path.to_string_lossy()})),
            )
            .into_value(),
            Err(e) => DapResponse::error(req, e).into_value(),
        }
    }

    fn record_breakpoints(&mut self, req: &DapRequest, reply: &Value) {
        if reply.get("success").and_then(Value::as_bool) != Some(true) {
            return;
        }
        let Some(source) = req
            .argument("source")
            .and_then(|s| s.get("path"))
            .and_then(Value::as_str)
        else {
            return;
        };
        let breakpoints = reply
            .get("body")
            .and_then(|b| b.get("breakpoints"))
            .cloned()
            .unwrap_or_else(|| json!([]));
        self.breakpoints.insert(source.to_string(), breakpoints);
    }
}
