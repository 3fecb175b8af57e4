//! Client of the external debug adapter.
//!
//! Runs on the transport worker thread: relays requests from the kernel control endpoints to
//! the external adapter over TCP, and adapter responses and events back to the kernel.

use crate::error::Error;
use crate::log::FileTracer;
use crate::muted_error;
use crate::protocol::{DapResponse, MessageKind};
use crate::transport::framing::{self, DapReader, DapWriter};
use crate::transport::socket::{Context, Frame, Socket};
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// Readiness handshake: the control side sends [`HANDSHAKE_REQUEST`] and the worker answers
/// [`HANDSHAKE_ACK`] once the external adapter is connected, [`HANDSHAKE_NAK`] otherwise.
pub const HANDSHAKE_REQUEST: &[u8] = b"REQ";
pub const HANDSHAKE_ACK: &[u8] = b"ACK";
pub const HANDSHAKE_NAK: &[u8] = b"NAK";

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Called for every event emitted by the external adapter.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Addresses the worker connects to.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// `host:port` of the external adapter.
    pub adapter: String,
    pub publisher: String,
    pub controller: String,
    pub controller_header: String,
}

enum Input {
    Request(Frame),
    Adapter(Value),
    ControlClosed,
    AdapterClosed,
}

/// State of the parallel initialization: the worker completes the configuration on behalf of
/// the front end once the adapter is initialized.
#[derive(Debug, Clone, Copy, PartialEq)]
enum InitState {
    Idle,
    AwaitInitialized { attach_seq: i64 },
    AwaitConfigurationDone { seq: i64 },
}

pub struct DapTcpClient {
    context: Context,
    connect_timeout: Duration,
    event_callback: EventCallback,
    tracer: Option<FileTracer>,
}

impl DapTcpClient {
    pub fn new(
        context: Context,
        connect_timeout: Duration,
        event_callback: EventCallback,
        tracer: Option<FileTracer>,
    ) -> Self {
        Self {
            context,
            connect_timeout,
            event_callback,
            tracer,
        }
    }

    /// Serve until the control endpoints are unbound.
    pub fn start_debugger(&self, endpoints: &Endpoints) -> Result<(), Error> {
        let request = self.context.connect(&endpoints.controller)?;
        let header = self.context.connect(&endpoints.controller_header)?;
        let publisher = muted_error!(
            self.context.connect(&endpoints.publisher),
            "events will not be published:"
        );

        let handshake = request.recv()?;
        if handshake != HANDSHAKE_REQUEST {
            let _ = request.send(HANDSHAKE_NAK.to_vec());
            return Err(Error::Worker(format!(
                "unexpected handshake: {}",
                String::from_utf8_lossy(&handshake)
            )));
        }

        let stream = match connect(&endpoints.adapter, self.connect_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = request.send(HANDSHAKE_NAK.to_vec());
                return Err(e);
            }
        };
        let (reader, writer) = framing::split(stream, self.tracer.clone())?;
        info!(target: "nbdap", "connected to external debug adapter at {}", endpoints.adapter);

        let (tx, rx) = mpsc::channel();
        let adapter_pump = spawn_adapter_pump(reader, tx.clone())?;
        let control_pump = spawn_control_pump(request.try_clone()?, tx)?;
        if let Err(e) = acknowledge(&request, &writer) {
            let _ = adapter_pump.join();
            let _ = control_pump.join();
            return Err(e);
        }

        let mut relay = Relay {
            writer,
            request,
            header,
            publisher,
            parent_header: Value::Null,
            adapter_alive: true,
            init: InitState::Idle,
            event_callback: self.event_callback.clone(),
        };

        for input in rx {
            match input {
                Input::Request(frame) => relay.on_request(&frame),
                Input::Adapter(msg) => relay.on_adapter_message(msg),
                Input::AdapterClosed => {
                    warn!(target: "nbdap", "external debug adapter closed the connection");
                    relay.adapter_alive = false;
                }
                Input::ControlClosed => break,
            }
        }

        debug!(target: "nbdap", "control endpoints closed, shutdown transport worker");
        relay.writer.shutdown();
        let _ = adapter_pump.join();
        let _ = control_pump.join();
        Ok(())
    }
}

/// Answer the readiness handshake. On failure the adapter connection is shut down so the
/// adapter pump stops.
fn acknowledge(request: &Socket, writer: &DapWriter) -> Result<(), Error> {
    if let Err(e) = request.send(HANDSHAKE_ACK.to_vec()) {
        writer.shutdown();
        return Err(e);
    }
    Ok(())
}

fn connect(addr: &str, timeout: Duration) -> Result<TcpStream, Error> {
    let start = Instant::now();
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if start.elapsed() > timeout {
                    warn!(target: "nbdap", "failed to connect to {addr}: {err}");
                    return Err(Error::AdapterUnreachable(addr.to_string()));
                }
                thread::sleep(CONNECT_RETRY_DELAY);
            }
        }
    }
}

fn spawn_adapter_pump(
    mut reader: DapReader,
    tx: Sender<Input>,
) -> Result<thread::JoinHandle<()>, Error> {
    let handle = thread::Builder::new()
        .name("nbdap-adapter-reader".to_string())
        .spawn(move || loop {
            match reader.read_message() {
                Ok(Some(msg)) => {
                    if tx.send(Input::Adapter(msg)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(Input::AdapterClosed);
                    break;
                }
                Err(e) => {
                    debug!(target: "nbdap", "read from external debug adapter: {e:#}");
                    let _ = tx.send(Input::AdapterClosed);
                    break;
                }
            }
        })?;
    Ok(handle)
}

fn spawn_control_pump(request: Socket, tx: Sender<Input>) -> Result<thread::JoinHandle<()>, Error> {
    let handle = thread::Builder::new()
        .name("nbdap-control-reader".to_string())
        .spawn(move || loop {
            match request.recv() {
                Ok(frame) => {
                    if tx.send(Input::Request(frame)).is_err() {
                        break;
                    }
                }
                Err(_) => {
                    let _ = tx.send(Input::ControlClosed);
                    break;
                }
            }
        })?;
    Ok(handle)
}

struct Relay {
    writer: DapWriter,
    request: Socket,
    header: Socket,
    publisher: Option<Socket>,
    parent_header: Value,
    adapter_alive: bool,
    init: InitState,
    event_callback: EventCallback,
}

impl Relay {
    fn on_request(&mut self, frame: &[u8]) {
        let msg: Value = match serde_json::from_slice(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(target: "nbdap", "drop malformed control frame: {e}");
                return;
            }
        };
        self.drain_header();

        if !self.adapter_alive {
            self.reply(
                DapResponse::error_for_raw(&msg, "external debug adapter is disconnected")
                    .into_value(),
            );
            return;
        }

        if msg.get("command").and_then(Value::as_str) == Some("attach") {
            let attach_seq = msg.get("seq").and_then(Value::as_i64).unwrap_or(0);
            self.init = InitState::AwaitInitialized { attach_seq };
        }

        if let Err(e) = self.writer.write_message(&msg) {
            warn!(target: "nbdap", "write to external debug adapter: {e:#}");
            self.adapter_alive = false;
            self.reply(
                DapResponse::error_for_raw(&msg, format!("external debug adapter: {e}"))
                    .into_value(),
            );
        }
    }

    fn on_adapter_message(&mut self, msg: Value) {
        match MessageKind::of(&msg) {
            Some(MessageKind::Event) => {
                (self.event_callback)(&msg);
                if msg.get("event").and_then(Value::as_str) == Some("initialized") {
                    self.complete_configuration();
                }
                self.publish(msg);
            }
            Some(MessageKind::Response) => {
                if let InitState::AwaitConfigurationDone { seq } = self.init {
                    let is_own = msg.get("command").and_then(Value::as_str)
                        == Some("configurationDone")
                        && msg.get("request_seq").and_then(Value::as_i64) == Some(seq);
                    if is_own {
                        debug!(target: "nbdap", "external debug adapter configured");
                        self.init = InitState::Idle;
                        return;
                    }
                }
                self.reply(msg);
            }
            Some(MessageKind::Request) => {
                let command = msg.get("command").and_then(Value::as_str).unwrap_or_default();
                debug!(target: "nbdap", "reverse request `{command}` is not supported");
                let rsp = json!({
                    "seq": 0,
                    "type": "response",
                    "request_seq": msg.get("seq").cloned().unwrap_or(Value::Null),
                    "success": false,
                    "command": command,
                    "message": "not supported",
                });
                muted_error!(self.writer.write_message(&rsp));
            }
            None => {
                warn!(target: "nbdap", "drop message of unknown type from external debug adapter");
            }
        }
    }

    fn complete_configuration(&mut self) {
        let InitState::AwaitInitialized { attach_seq } = self.init else {
            return;
        };
        let seq = attach_seq + 1;
        let request = json!({
            "seq": seq,
            "type": "request",
            "command": "configurationDone",
        });
        match self.writer.write_message(&request) {
            Ok(()) => self.init = InitState::AwaitConfigurationDone { seq },
            Err(e) => {
                warn!(target: "nbdap", "send configurationDone: {e:#}");
                self.init = InitState::Idle;
            }
        }
    }

    fn drain_header(&mut self) {
        while let Ok(Some(frame)) = self.header.try_recv() {
            self.parent_header = serde_json::from_slice(&frame).unwrap_or(Value::Null);
        }
    }

    fn reply(&self, msg: Value) {
        let frame = match serde_json::to_vec(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "nbdap", "serialize reply: {e}");
                return;
            }
        };
        muted_error!(self.request.send(frame), "reply to control endpoint:");
    }

    fn publish(&self, event: Value) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let frame = json!({
            "header": self.parent_header,
            "content": event,
        });
        if let Ok(frame) = serde_json::to_vec(&frame) {
            muted_error!(publisher.send(frame), "publish event:");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::socket::controller_endpoint;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_failed_acknowledge_closes_adapter_connection() {
        let ctx = Context::new();
        let endpoint = controller_endpoint("ack_test");
        let mut control = ctx.socket();
        control.bind(&endpoint).unwrap();
        let request = ctx.connect(&endpoint).unwrap();
        // control side is gone before the worker answers the handshake
        control.unbind(&endpoint).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut adapter_side, _) = listener.accept().unwrap();
        let (_reader, writer) = framing::split(stream, None).unwrap();

        assert!(matches!(
            acknowledge(&request, &writer),
            Err(Error::Disconnected(_))
        ));

        adapter_side
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(adapter_side.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_acknowledge() {
        let ctx = Context::new();
        let endpoint = controller_endpoint("ack_ok_test");
        let mut control = ctx.socket();
        control.bind(&endpoint).unwrap();
        let request = ctx.connect(&endpoint).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let _adapter_side = listener.accept().unwrap();
        let (_reader, writer) = framing::split(stream, None).unwrap();

        acknowledge(&request, &writer).unwrap();
        assert_eq!(control.recv().unwrap(), HANDSHAKE_ACK.to_vec());
    }
}
