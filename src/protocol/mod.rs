//! Tool-call protocol engine.
//!
//! One logical request/response contract over two transports:
//! - [`stdio`]: line-delimited JSON-RPC on a child process's stdio streams,
//!   with chunk reassembly, per-call correlation, and the one-time
//!   initialize handshake.
//! - [`remote`]: the same envelope carried in HTTP POST bodies.
//!
//! [`framing`] holds the transport-independent line reassembly.

pub mod framing;
pub mod remote;
pub mod stdio;

pub use remote::RemoteEndpoint;
pub use stdio::{StdioConnection, CALL_TIMEOUT, HANDSHAKE_TIMEOUT, PROTOCOL_VERSION};
