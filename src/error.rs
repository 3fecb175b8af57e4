use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    // --------------------------------- transport errors ------------------------------------------
    #[error("endpoint {0} already in use")]
    AddressInUse(String),
    #[error("endpoint {0} is not bound")]
    EndpointNotBound(String),
    #[error("socket is not bound or connected")]
    NotConnected,
    #[error("peer of endpoint {0} is gone")]
    Disconnected(String),
    #[error("no message received in {0:?}")]
    Timeout(Duration),
    #[error("external debug adapter at {0} is unreachable")]
    AdapterUnreachable(String),

    // --------------------------------- protocol errors -------------------------------------------
    #[error("malformed DAP message: {0}")]
    MalformedMessage(String),
    #[error("argument `{0}` is missing or has a wrong type")]
    MissingArgument(&'static str),

    // --------------------------------- bootstrap errors ------------------------------------------
    #[error("no free port in range {0}..={1}")]
    NoFreePort(u16, u16),
    #[error("external debug adapter failed to start: {0}")]
    Bootstrap(#[source] InterpreterError),

    // --------------------------------- interpreter errors ----------------------------------------
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),
    #[error("synthetic global `{0}` not found")]
    SlotMissing(String),

    // --------------------------------- session errors --------------------------------------------
    #[error("debug session is not started")]
    NotStarted,
    #[error("transport worker: {0}")]
    Worker(String),
}

impl Error {
    /// Return a hint to the control session - answer the request with an error reply, or tear
    /// the transport down.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Json(_) => false,
            Error::Timeout(_) => false,
            Error::MalformedMessage(_) => false,
            Error::MissingArgument(_) => false,
            Error::Bootstrap(_) => false,
            Error::Interpreter(_) => false,
            Error::SlotMissing(_) => false,
            Error::NotStarted => false,

            // transport level errors are fatal
            Error::IO(_) => true,
            Error::AddressInUse(_) => true,
            Error::EndpointNotBound(_) => true,
            Error::NotConnected => true,
            Error::Disconnected(_) => true,
            Error::AdapterUnreachable(_) => true,
            Error::NoFreePort(_, _) => true,
            Error::Worker(_) => true,
        }
    }
}

/// Exception raised by the interpreter while running code or converting a value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{ename}: {evalue}")]
pub struct InterpreterError {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl InterpreterError {
    pub fn new(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback: vec![],
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "nbdap", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "nbdap", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
