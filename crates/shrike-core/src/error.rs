use std::fmt;

use crate::value::RemoteThrowable;

/// Errors surfaced to channel callers.
///
/// The variants mirror the failure responses of the wire protocol plus the
/// local failure modes (framing, closure, cancellation). The type is `Clone`
/// so a memoized handshake outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The server reported that the target component does not exist.
    TargetMissing(String),

    /// The server reported that the invoked method does not exist.
    MethodMissing(String),

    /// A session was opened against a component that is not stateful.
    NotStateful(String),

    /// The stateful session addressed by the invocation is gone.
    SessionInactive(String),

    /// The invocation completed with an exception thrown by the application.
    ApplicationException(Box<RemoteThrowable>),

    /// Unknown opcode, truncated frame, or codec failure.
    ProtocolError(String),

    /// The transport closed before a response arrived.
    ChannelClosed,

    /// The caller was cancelled while waiting.
    Interrupted,

    /// Version negotiation failed.
    HandshakeFailed(String),
}

impl Error {
    /// Shorthand for a [`Error::ProtocolError`] with a formatted message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolError(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TargetMissing(msg) => write!(f, "no such component: {}", msg),
            Error::MethodMissing(msg) => write!(f, "no such method: {}", msg),
            Error::NotStateful(msg) => write!(f, "component is not stateful: {}", msg),
            Error::SessionInactive(msg) => write!(f, "session is no longer active: {}", msg),
            Error::ApplicationException(t) => write!(f, "application exception: {}", t),
            Error::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            Error::ChannelClosed => write!(f, "channel closed"),
            Error::Interrupted => write!(f, "interrupted while waiting for a response"),
            Error::HandshakeFailed(msg) => write!(f, "handshake failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
