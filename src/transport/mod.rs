//! Transport between the kernel control thread and the external debug adapter.

pub mod client;
pub mod framing;
pub mod socket;
pub mod worker;

pub use client::{DapTcpClient, Endpoints, EventCallback};
pub use socket::{Context, Frame, Socket, controller_endpoint, publisher_endpoint};
pub use worker::WorkerHandle;

/// Name of the request control channel.
pub const DEBUGGER_CHANNEL: &str = "debugger";
/// Name of the header control channel.
pub const DEBUGGER_HEADER_CHANNEL: &str = "debugger_header";
