#![allow(dead_code)]

use nbdap::bootstrap::Bootstrap;
use nbdap::config::Settings;
use nbdap::error::{Error, InterpreterError};
use nbdap::interpreter::{ExecuteReply, GlobalScope, Interpreter, ShellChannel};
use nbdap::transport::framing::{read_message, write_message};
use nbdap::{ControlSession, DebuggerBuilder};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

const RENDER_CALL: &str = "get_ipython().display_formatter.format(";
const IMPORT: &str = "from IPython import get_ipython;";

#[derive(Clone)]
pub struct FakeValue {
    pub json: Option<Value>,
    pub repr: String,
    pub type_repr: String,
}

impl FakeValue {
    pub fn json(value: Value, type_name: &str) -> Self {
        Self {
            repr: value.to_string(),
            json: Some(value),
            type_repr: format!("<class '{type_name}'>"),
        }
    }

    pub fn opaque(repr: &str, type_name: &str) -> Self {
        Self {
            json: None,
            repr: repr.to_string(),
            type_repr: format!("<class '{type_name}'>"),
        }
    }
}

#[derive(Default)]
struct FakeState {
    globals: Vec<(String, FakeValue)>,
    /// `(data, metadata)` rendered by the display formatter, per variable.
    renderings: HashMap<String, (Value, Value)>,
    executed: Vec<String>,
}

impl FakeState {
    fn set(&mut self, name: &str, value: FakeValue) {
        match self.globals.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.globals.push((name.to_string(), value)),
        }
    }

    fn get(&self, name: &str) -> Result<&FakeValue, InterpreterError> {
        self.globals
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| InterpreterError::new("NameError", format!("name '{name}' is not defined")))
    }

    /// Evaluate `a,b = get_ipython().display_formatter.format(var)`.
    fn assign_rendering(&mut self, lvalue: &str, rvalue: &str) -> Result<(), InterpreterError> {
        let syntax_error = || InterpreterError::new("SyntaxError", "invalid syntax");
        let variable = rvalue
            .trim()
            .strip_prefix(RENDER_CALL)
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(syntax_error)?;
        let (data_slot, metadata_slot) = lvalue.trim().split_once(',').ok_or_else(syntax_error)?;

        self.get(variable)?;
        let (data, metadata) = self
            .renderings
            .get(variable)
            .cloned()
            .unwrap_or_else(|| (json!({}), json!({})));
        self.set(data_slot.trim(), FakeValue::json(data, "dict"));
        self.set(metadata_slot.trim(), FakeValue::json(metadata, "dict"));
        Ok(())
    }
}

/// Interpreter with a scripted global scope.
#[derive(Clone, Default)]
pub struct FakeInterpreter {
    state: Arc<Mutex<FakeState>>,
}

impl FakeInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(self, name: &str, value: FakeValue) -> Self {
        self.state.lock().unwrap().set(name, value);
        self
    }

    pub fn with_rendering(self, name: &str, data: Value, metadata: Value) -> Self {
        self.state
            .lock()
            .unwrap()
            .renderings
            .insert(name.to_string(), (data, metadata));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn global_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.globals.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Apply a `setExpression` evaluated by the external adapter in a stopped frame.
    pub fn set_expression(&self, expression: &str, value: &str) -> Result<(), InterpreterError> {
        self.state.lock().unwrap().assign_rendering(expression, value)
    }
}

struct FakeScope<'a> {
    state: MutexGuard<'a, FakeState>,
}

impl GlobalScope for FakeScope<'_> {
    fn names(&self) -> Vec<String> {
        self.state.globals.iter().map(|(n, _)| n.clone()).collect()
    }

    fn to_json(&self, name: &str) -> Result<Value, InterpreterError> {
        self.state
            .get(name)?
            .json
            .clone()
            .ok_or_else(|| InterpreterError::new("TypeError", "Object is not JSON serializable"))
    }

    fn repr(&self, name: &str) -> Result<String, InterpreterError> {
        Ok(self.state.get(name)?.repr.clone())
    }

    fn type_repr(&self, name: &str) -> Result<String, InterpreterError> {
        Ok(self.state.get(name)?.type_repr.clone())
    }

    fn exec(&mut self, code: &str) -> Result<(), InterpreterError> {
        self.state.executed.push(code.to_string());
        let statement = code.strip_prefix(IMPORT).unwrap_or(code);
        let (lvalue, rvalue) = statement
            .split_once('=')
            .ok_or_else(|| InterpreterError::new("SyntaxError", "invalid syntax"))?;
        self.state.assign_rendering(lvalue, rvalue)
    }

    fn take(&mut self, name: &str) -> Result<Option<Value>, InterpreterError> {
        let Some(pos) = self.state.globals.iter().position(|(n, _)| n == name) else {
            return Ok(None);
        };
        let (_, value) = self.state.globals.remove(pos);
        Ok(value.json)
    }
}

impl Interpreter for FakeInterpreter {
    fn acquire(&self) -> Box<dyn GlobalScope + '_> {
        Box::new(FakeScope {
            state: self.state.lock().unwrap(),
        })
    }
}

/// Shell channel answering every request with the same reply.
#[derive(Clone)]
pub struct FakeShell {
    reply: ExecuteReply,
    codes: Arc<Mutex<Vec<String>>>,
}

impl FakeShell {
    pub fn ok() -> Self {
        Self {
            reply: ExecuteReply::ok(),
            codes: Default::default(),
        }
    }

    pub fn failing(ename: &str, evalue: &str, traceback: &[&str]) -> Self {
        Self {
            reply: ExecuteReply {
                status: "error".to_string(),
                ename: Some(ename.to_string()),
                evalue: Some(evalue.to_string()),
                traceback: traceback.iter().map(|s| s.to_string()).collect(),
            },
            codes: Default::default(),
        }
    }

    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().unwrap().clone()
    }
}

impl ShellChannel for FakeShell {
    fn execute(&self, code: &str) -> Result<ExecuteReply, Error> {
        self.codes.lock().unwrap().push(code.to_string());
        Ok(self.reply.clone())
    }
}

/// Scripted external debug adapter listening on a local TCP port.
///
/// Every request gets a successful response. `attach` is followed by an `initialized` event,
/// `pause` by a `stopped` event for thread 1, `continue` by a `continued` event.
/// `setExpression` is applied to the fake interpreter.
pub struct FakeAdapter {
    pub port: u16,
    received: Arc<Mutex<Vec<Value>>>,
}

impl FakeAdapter {
    pub fn spawn(interpreter: FakeInterpreter) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let received: Arc<Mutex<Vec<Value>>> = Default::default();

        let log = received.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                serve(stream, &interpreter, &log);
            }
        });

        Self { port, received }
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|m| m["command"].as_str().map(ToString::to_string))
            .collect()
    }

    /// Wait until the adapter receives a request matching `pred`.
    pub fn wait_for(&self, pred: impl Fn(&Value) -> bool) -> Option<Value> {
        let start = Instant::now();
        while start.elapsed() < WAIT_TIMEOUT {
            if let Some(msg) = self.received().into_iter().find(|m| pred(m)) {
                return Some(msg);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }
}

fn serve(stream: TcpStream, interpreter: &FakeInterpreter, log: &Mutex<Vec<Value>>) {
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    let mut seq = 0;
    let mut next_seq = || {
        seq += 1;
        seq
    };

    while let Ok(Some(request)) = read_message(&mut reader) {
        log.lock().unwrap().push(request.clone());
        let command = request["command"].as_str().unwrap_or_default().to_string();

        let mut body = json!({});
        let mut success = true;
        match command.as_str() {
            "setBreakpoints" => {
                let breakpoints: Vec<Value> = request["arguments"]["breakpoints"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|bp| json!({"verified": true, "line": bp["line"]}))
                    .collect();
                body = json!({ "breakpoints": breakpoints });
            }
            "setExpression" => {
                let arguments = &request["arguments"];
                success = interpreter
                    .set_expression(
                        arguments["expression"].as_str().unwrap_or_default(),
                        arguments["value"].as_str().unwrap_or_default(),
                    )
                    .is_ok();
                body = json!({ "value": "(...)" });
            }
            _ => {}
        }

        let response = json!({
            "seq": next_seq(),
            "type": "response",
            "request_seq": request["seq"],
            "success": success,
            "command": command,
            "body": body,
        });
        if write_message(&mut writer, &response).is_err() {
            break;
        }

        let event = match command.as_str() {
            "attach" => Some(json!({"event": "initialized"})),
            "pause" => Some(json!({
                "event": "stopped",
                "body": {"reason": "pause", "threadId": 1, "allThreadsStopped": true},
            })),
            "continue" => Some(json!({
                "event": "continued",
                "body": {"threadId": 1, "allThreadsContinued": true},
            })),
            _ => None,
        };
        if let Some(mut event) = event {
            event["seq"] = json!(next_seq());
            event["type"] = json!("event");
            if write_message(&mut writer, &event).is_err() {
                break;
            }
        }

        if command == "disconnect" {
            break;
        }
    }
}

/// Bootstrap state private to one test.
pub fn fresh_bootstrap() -> &'static Bootstrap {
    Box::leak(Box::new(Bootstrap::new()))
}

pub fn test_settings() -> Settings {
    Settings {
        handshake_timeout_ms: 5_000,
        forward_timeout_ms: 2_000,
        connect_timeout_ms: 2_000,
        shutdown_timeout_ms: 2_000,
        ..Settings::default()
    }
}

pub fn session(interpreter: FakeInterpreter, shell: FakeShell, port: u16) -> ControlSession {
    let debugger = DebuggerBuilder::new()
        .with_settings(test_settings())
        .with_bootstrap(fresh_bootstrap())
        .with_port(port)
        .build(Arc::new(interpreter), Arc::new(shell))
        .unwrap();
    ControlSession::new(debugger).unwrap()
}

pub fn request(seq: i64, command: &str, arguments: Value) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": command,
        "arguments": arguments,
    })
}

pub fn kernel_header(msg_id: &str) -> Value {
    json!({"msg_id": msg_id, "msg_type": "debug_request"})
}

/// Wait for a published event of the given kind.
pub fn wait_event(session: &ControlSession, event: &str) -> Value {
    let start = Instant::now();
    loop {
        let left = WAIT_TIMEOUT.saturating_sub(start.elapsed());
        let published = session
            .next_event(left)
            .unwrap_or_else(|e| panic!("no `{event}` event: {e}"));
        if published["content"]["event"] == event {
            return published;
        }
    }
}

pub fn assert_response(response: &Value, command: &str, request_seq: i64, success: bool) {
    assert_eq!(response["type"], "response", "response: {response}");
    assert_eq!(response["command"], command, "response: {response}");
    assert_eq!(response["request_seq"], request_seq, "response: {response}");
    assert_eq!(response["success"], success, "response: {response}");
}
