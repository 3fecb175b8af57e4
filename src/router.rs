//! Requests handled locally instead of being relayed to the external adapter.

use crate::error::Error;
use crate::filter;
use crate::interpreter::{Interpreter, short_type_name};
use crate::protocol::{DapRequest, DapResponse, Variable};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Round trip of a request to the external debug adapter.
pub trait Forward {
    /// Send a request and wait for the matching response.
    fn forward(&mut self, request: &Value) -> Result<Value, Error>;
}

/// Locally handled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::EnumIter)]
pub enum Handler {
    InspectVariables,
    RichInspectVariables,
    Attach,
    ConfigurationDone,
}

impl Handler {
    pub fn command(self) -> &'static str {
        match self {
            Handler::InspectVariables => "inspectVariables",
            Handler::RichInspectVariables => "richInspectVariables",
            Handler::Attach => "attach",
            Handler::ConfigurationDone => "configurationDone",
        }
    }

    /// User-facing handlers are part of the debugging session itself and are only valid
    /// when the session is started. Others work on the idle kernel too.
    pub fn is_user_facing(self) -> bool {
        match self {
            Handler::InspectVariables | Handler::RichInspectVariables => false,
            Handler::Attach | Handler::ConfigurationDone => true,
        }
    }
}

/// Command name to handler mapping.
pub struct HandlerTable {
    routes: HashMap<&'static str, Handler>,
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        use strum::IntoEnumIterator;
        Self {
            routes: Handler::iter().map(|h| (h.command(), h)).collect(),
        }
    }

    pub fn lookup(&self, command: &str) -> Option<Handler> {
        self.routes.get(command).copied()
    }

    /// Commands announced as user-facing capabilities.
    pub fn user_facing(&self) -> Vec<&'static str> {
        let mut commands: Vec<_> = self
            .routes
            .values()
            .filter(|h| h.is_user_facing())
            .map(|h| h.command())
            .collect();
        commands.sort_unstable();
        commands
    }
}

/// Handle `inspectVariables`: list visible interpreter globals.
///
/// A value without JSON conversion is reported by its textual representation.
pub fn inspect_variables(interpreter: &dyn Interpreter, req: &DapRequest) -> DapResponse {
    let scope = interpreter.acquire();

    let variables: Vec<Variable> = scope
        .names()
        .into_iter()
        .filter(|name| filter::keep(name))
        .map(|name| {
            let value = scope.to_json(&name).unwrap_or_else(|_| {
                Value::String(
                    scope
                        .repr(&name)
                        .unwrap_or_else(|_| "<unavailable>".to_string()),
                )
            });
            let type_name = scope
                .type_repr(&name)
                .map(|t| short_type_name(&t).to_string())
                .unwrap_or_default();
            Variable {
                name,
                type_name,
                value,
                variables_reference: Variable::NOT_EXPANDABLE,
            }
        })
        .collect();
    drop(scope);

    DapResponse::success(req, Some(json!({ "variables": variables })))
}

/// Handle `attach`: point the external adapter to its own listening address and relay.
pub fn attach(
    host: &str,
    port: u16,
    forward: &mut dyn Forward,
    req: &DapRequest,
) -> Result<Value, Error> {
    let mut req = req.clone();
    let arguments = req.arguments_mut();
    arguments.insert("connect".to_string(), json!({ "host": host, "port": port }));
    arguments.insert("logToFile".to_string(), Value::Bool(true));

    forward.forward(&serde_json::to_value(&req)?)
}

/// Handle `configurationDone`.
///
/// The transport worker completes the configuration as soon as the external adapter is
/// initialized, so the front end request is only acknowledged.
pub fn configuration_done(req: &DapRequest) -> DapResponse {
    DapResponse::success(req, None)
}
