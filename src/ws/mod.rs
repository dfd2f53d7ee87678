//! C6-C10 — the WebSocket client stack: frame codec, handshake, blocking
//! socket transport, heartbeat timers, and the reconnecting client runtime.
//!
//! Hand-rolled rather than built on a high-level WebSocket crate: the
//! wire-level contracts here (mask enforcement, exact length-class
//! boundaries, RSV/opcode validation) are themselves part of what this
//! layer is responsible for, and a library would hide the seam.

pub mod client;
pub mod frame;
pub mod handshake;
pub mod heartbeat;
pub mod netio;

pub use client::{WsClient, WsHandlers};
pub use handshake::WsUri;
