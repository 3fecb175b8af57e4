//! Seams to the embedded interpreter.
//!
//! The bridge never links an interpreter itself. The kernel provides two things:
//! an [`Interpreter`] giving locked access to the global scope of the user namespace, and a
//! [`ShellChannel`] that runs code on the kernel execution channel (used once, at bootstrap).

use crate::error::{Error, InterpreterError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Locked view of the interpreter global scope.
///
/// A scope is obtained with [`Interpreter::acquire`] and holds the interpreter global
/// execution lock until dropped.
pub trait GlobalScope {
    /// Names of all globals, in interpreter order.
    fn names(&self) -> Vec<String>;

    /// Convert a global into a JSON value.
    fn to_json(&self, name: &str) -> Result<Value, InterpreterError>;

    /// Textual representation of a global (`repr`).
    fn repr(&self, name: &str) -> Result<String, InterpreterError>;

    /// Textual representation of the global type, like `<class 'int'>`.
    fn type_repr(&self, name: &str) -> Result<String, InterpreterError>;

    /// Run code in the global scope.
    fn exec(&mut self, code: &str) -> Result<(), InterpreterError>;

    /// Remove a global and return its JSON conversion, [`None`] if there is no such global.
    fn take(&mut self, name: &str) -> Result<Option<Value>, InterpreterError>;
}

/// Embedded interpreter runtime.
pub trait Interpreter: Send + Sync {
    /// Acquire the global execution lock, released when the returned scope is dropped.
    fn acquire(&self) -> Box<dyn GlobalScope + '_>;
}

/// Reply of the kernel execution channel to a "run code" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteReply {
    pub status: String,
    #[serde(default)]
    pub ename: Option<String>,
    #[serde(default)]
    pub evalue: Option<String>,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl ExecuteReply {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            ename: None,
            evalue: None,
            traceback: vec![],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Turn a failed reply into an [`InterpreterError`].
    pub fn into_result(self) -> Result<(), InterpreterError> {
        if self.is_ok() {
            return Ok(());
        }
        Err(InterpreterError {
            ename: self.ename.unwrap_or_default(),
            evalue: self.evalue.unwrap_or_default(),
            traceback: self.traceback,
        })
    }
}

/// Side channel to the kernel execution (shell) channel.
pub trait ShellChannel: Send + Sync {
    /// Run code as a single "run code" request and wait for the reply.
    fn execute(&self, code: &str) -> Result<ExecuteReply, Error>;
}

/// Strip the `<class '...'>` decoration from a type representation.
pub fn short_type_name(type_repr: &str) -> &str {
    type_repr
        .strip_prefix("<class '")
        .and_then(|s| s.strip_suffix("'>"))
        .unwrap_or(type_repr)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("<class 'int'>"), "int");
        assert_eq!(
            short_type_name("<class 'pandas.core.frame.DataFrame'>"),
            "pandas.core.frame.DataFrame"
        );
        assert_eq!(short_type_name("builtin"), "builtin");
    }

    #[test]
    fn test_execute_reply_error() {
        let reply: ExecuteReply = serde_json::from_value(json!({
            "status": "error",
            "ename": "ImportError",
            "evalue": "No module named 'debugpy'",
            "traceback": ["line 1", "line 2"],
        }))
        .unwrap();
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.ename, "ImportError");
        assert_eq!(err.traceback.len(), 2);
        assert_eq!(
            err.to_string(),
            "ImportError: No module named 'debugpy'"
        );
    }
}
