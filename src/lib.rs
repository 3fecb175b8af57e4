//! nbdap - debug adapter bridge for notebook kernels.
//!
//! Intercepts the debug requests that need access to the interpreter (variable listing,
//! rich rendering, attach and configuration) and relays everything else to an external
//! debug adapter running inside the interpreter.

pub mod base;
pub mod bootstrap;
pub mod config;
pub mod debugger;
pub mod error;
pub mod filter;
pub mod interpreter;
pub mod log;
pub mod protocol;
pub mod rich;
pub mod router;
pub mod threads;
pub mod tmp;
pub mod transport;

pub use base::ControlSession;
pub use debugger::{Debugger, DebuggerBuilder, DebuggerInfo};
pub use error::Error;
