//! Rich (multi-MIME) rendering of a single interpreter variable.
//!
//! The interpreter computes the rendering into a pair of synthetic globals, the bridge reads
//! them back. Each call uses its own pair of globals named after a fresh correlation id, so
//! concurrent calls never share a slot.

use crate::error::Error;
use crate::interpreter::Interpreter;
use crate::protocol::{DapRequest, DapResponse, RichRepresentation};
use crate::router::Forward;
use log::debug;
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Pair of synthetic globals receiving a rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct RichSlot {
    pub data: String,
    pub metadata: String,
}

impl RichSlot {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        let id = id.simple();
        Self {
            data: format!("__nbdap_rich_{id}_data"),
            metadata: format!("__nbdap_rich_{id}_metadata"),
        }
    }

    /// Assignment target of the rendering expression.
    pub fn lvalue(&self) -> String {
        format!("{},{}", self.data, self.metadata)
    }

    /// Code running the rendering directly in the interpreter.
    pub fn direct_code(&self, variable: &str) -> String {
        format!(
            "from IPython import get_ipython;{}= {}",
            self.lvalue(),
            format_expression(variable)
        )
    }

    /// `setExpression` request evaluating the rendering in a stopped frame.
    pub fn set_expression_request(&self, variable: &str, frame_id: i64, seq: i64) -> Value {
        json!({
            "type": "request",
            "command": "setExpression",
            "seq": seq,
            "arguments": {
                "expression": self.lvalue(),
                "value": format_expression(variable),
                "frameId": frame_id,
            },
        })
    }
}

impl Default for RichSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Expression producing the `(data, metadata)` pair of a variable.
pub fn format_expression(variable: &str) -> String {
    format!("get_ipython().display_formatter.format({variable})")
}

/// Build the reply body from the rendered pair. Metadata entries without data are dropped.
pub fn assemble(data: &Value, metadata: &Value) -> RichRepresentation {
    let mut repr = RichRepresentation::default();
    let empty = Map::new();
    let data = data.as_object().unwrap_or(&empty);
    let metadata = metadata.as_object().unwrap_or(&empty);

    for (mime, rendered) in data {
        repr.data.insert(mime.clone(), rendered.clone());
        if let Some(meta) = metadata.get(mime) {
            repr.metadata.insert(mime.clone(), meta.clone());
        }
    }
    repr
}

/// Handle `richInspectVariables`.
///
/// If no thread is stopped the rendering runs directly in the interpreter. Otherwise the
/// interpreter is busy at a breakpoint and the rendering is evaluated by the external adapter
/// in the requested frame, with a `setExpression` request forwarded as `seq + 1`. That
/// round trip completes before the slot is read back.
pub fn rich_inspect_variables(
    interpreter: &dyn Interpreter,
    forward: &mut dyn Forward,
    stopped: bool,
    req: &DapRequest,
) -> Result<DapResponse, Error> {
    let variable = req.str_argument("variableName")?;
    let slot = RichSlot::new();

    if !stopped {
        let mut scope = interpreter.acquire();
        scope.exec(&slot.direct_code(variable))?;
    } else {
        let frame_id = req.i64_argument("frameId")?;
        let request = slot.set_expression_request(variable, frame_id, req.seq + 1);
        debug!(target: "nbdap", "render `{variable}` in frame {frame_id}");
        let reply = forward.forward(&request)?;
        if reply.get("success").and_then(Value::as_bool) != Some(true) {
            let message = reply
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("setExpression failed");
            return Ok(DapResponse::error(req, message));
        }
    }

    let (data, metadata) = {
        let mut scope = interpreter.acquire();
        let data = scope.take(&slot.data)?;
        let metadata = scope.take(&slot.metadata)?;
        (data, metadata)
    };
    let data = data.ok_or_else(|| Error::SlotMissing(slot.data.clone()))?;
    let metadata = metadata.unwrap_or(Value::Null);

    let repr = assemble(&data, &metadata);
    Ok(DapResponse::success(req, Some(serde_json::to_value(repr)?)))
}
