//! Crate-wide error vocabulary.
//!
//! Mirrors the error kinds named by the platform contract rather than
//! wrapping every library error as-is: callers need to match on *kind*
//! (a protocol error forces a disconnect, a timeout does not) so this is a
//! concrete enum instead of an opaque `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("allocation failed: {0}")]
    AllocFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("send error: {0}")]
    SendError(String),

    #[error("recv error: {0}")]
    RecvError(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timeout")]
    Timeout,

    #[error("closed by peer")]
    ClosedByPeer,

    #[error("driver error: {0}")]
    Driver(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            TimedOut | WouldBlock => CoreError::Timeout,
            ConnectionReset | ConnectionAborted | BrokenPipe | NotConnected => {
                CoreError::ClosedByPeer
            }
            _ => CoreError::RecvError(e.to_string()),
        }
    }
}
