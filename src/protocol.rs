use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// DAP request envelope.
///
/// Fields that are not part of the envelope are kept in `extra` so that a request
/// can be rewritten and forwarded without losing anything the front end sent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DapRequest {
    pub fn from_value(message: &Value) -> Result<Self, Error> {
        let req: DapRequest = serde_json::from_value(message.clone())
            .map_err(|e| Error::MalformedMessage(e.to_string()))?;
        if req.r#type != "request" {
            return Err(Error::MalformedMessage(format!(
                "expect a request, got `{}`",
                req.r#type
            )));
        }
        Ok(req)
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    pub fn str_argument(&self, name: &'static str) -> Result<&str, Error> {
        self.argument(name)
            .and_then(Value::as_str)
            .ok_or(Error::MissingArgument(name))
    }

    pub fn i64_argument(&self, name: &'static str) -> Result<i64, Error> {
        self.argument(name)
            .and_then(Value::as_i64)
            .ok_or(Error::MissingArgument(name))
    }

    /// Mutable access to the arguments object, created if the request has none.
    pub fn arguments_mut(&mut self) -> &mut Map<String, Value> {
        if !self.arguments.is_object() {
            self.arguments = Value::Object(Map::new());
        }
        match &mut self.arguments {
            Value::Object(map) => map,
            _ => unreachable!("arguments replaced by an object above"),
        }
    }
}

/// DAP response envelope. `body` and `message` are omitted when absent.
#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DapResponse {
    /// Local reply to a request, the reply reuses the request `seq`.
    pub fn success(req: &DapRequest, body: Option<Value>) -> Self {
        Self {
            seq: req.seq,
            r#type: "response",
            request_seq: req.seq,
            success: true,
            command: req.command.clone(),
            message: None,
            body,
        }
    }

    pub fn error(req: &DapRequest, message: impl ToString) -> Self {
        Self {
            seq: req.seq,
            r#type: "response",
            request_seq: req.seq,
            success: false,
            command: req.command.clone(),
            message: Some(message.to_string()),
            body: None,
        }
    }

    /// Error reply for a message that could not even be parsed as a request.
    pub fn error_for_raw(message: &Value, text: impl ToString) -> Self {
        let seq = message.get("seq").and_then(Value::as_i64).unwrap_or(0);
        let command = message
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            seq,
            r#type: "response",
            request_seq: seq,
            success: false,
            command,
            message: Some(text.to_string()),
            body: None,
        }
    }

    pub fn into_value(self) -> Value {
        // serialization of this struct can't fail: all keys are strings
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Kind of DAP message, taken from the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Event,
}

impl MessageKind {
    pub fn of(message: &Value) -> Option<Self> {
        message.get("type")?.as_str()?.parse().ok()
    }
}

/// Debugger-visible interpreter global, an item of `inspectVariables` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: Value,
    #[serde(rename = "variablesReference")]
    pub variables_reference: i64,
}

impl Variable {
    /// Variables of the global listing are never expandable on their own.
    pub const NOT_EXPANDABLE: i64 = 0;
}

/// Multi-MIME rendering of a single variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichRepresentation {
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
}
