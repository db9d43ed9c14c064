//! Failure taxonomy for session and command operations.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A caller-side check failed; nothing was sent over the socket.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The server explicitly denied the action with a structured reason.
    #[error("rejected by server: {0}")]
    GameRejection(String),

    /// No correlated confirmation arrived within the operation's deadline.
    /// All listeners for the operation were torn down.
    #[error("timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// A movement diverged from its intended trajectory or was superseded
    /// by a newer one. The position mirror keeps its last confirmed or
    /// extrapolated value, never the optimistic target.
    #[error("movement interrupted: {0}")]
    MoveInterrupted(String),

    /// Connection lifecycle failure: handshake timeout, a game error during
    /// connect, or a dead socket.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// No route exists. Fatal to the single movement request only.
    #[error(transparent)]
    Path(#[from] pathfinder::PathError),
}

impl ClientError {
    pub fn precondition(message: impl Into<String>) -> Self {
        ClientError::Precondition(message.into())
    }

    pub fn rejection(message: impl Into<String>) -> Self {
        ClientError::GameRejection(message.into())
    }
}
