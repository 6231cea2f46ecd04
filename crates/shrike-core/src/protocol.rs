use std::fmt;

/// Highest protocol version this client speaks.
pub const MAX_VERSION: u8 = 3;

/// Name of the transport channel carrying the protocol.
pub const CHANNEL_NAME: &str = "ejb";

/// Short name of the object-graph codec sent during the handshake.
pub const CODEC_NAME: &str = "river";

/// Codec tag bytes of the handshake reply: a one-byte length prefix
/// followed by the codec name.
pub const CODEC_TAG: [u8; 6] = [0x05, b'r', b'i', b'v', b'e', b'r'];

/// Reserved attachment key carrying the private attachment map as a single
/// wire entry.
pub const PRIVATE_ATTACHMENTS_KEY: &str = "jboss.private.attachments";

/// Reserved attachment key under which the transaction id is duplicated on
/// v1/v2 streams.
pub const TRANSACTION_ID_KEY: &str = "jboss.transaction.id";

/// Response attachment key carrying a weak affinity hint.
pub const WEAK_AFFINITY_KEY: &str = "jboss.weak-affinity";

/// Message opcodes.
///
/// Every frame except the handshake greeting starts with one of these,
/// followed by a big-endian 16-bit invocation id.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Open a stateful session (request).
    OpenSessionRequest = 0x01,

    /// Session created (response).
    OpenSessionResponse = 0x02,

    /// Invoke a method (request).
    InvocationRequest = 0x03,

    /// Method completed normally (response).
    InvocationResponse = 0x05,

    /// Method or session-open completed with a thrown exception.
    ApplicationException = 0x06,

    /// The addressed component does not exist.
    NoSuchEjb = 0x0A,

    /// The addressed method does not exist.
    NoSuchMethod = 0x0B,

    /// The addressed stateful session is gone.
    SessionNotActive = 0x0C,

    /// Session-open target is not a stateful component.
    EjbNotStateful = 0x0D,

    /// The request will continue asynchronously; the real response follows
    /// later under the same id.
    ProceedAsyncResponse = 0x0E,

    /// Method completed normally; body is a DEFLATE stream wrapping an
    /// invocation-response body.
    CompressedInvocationMessage = 0x1B,
}

impl Opcode {
    /// Convert from a wire byte. Returns `None` for unknown opcodes.
    pub fn from_u8(val: u8) -> Option<Self> {
        Some(match val {
            0x01 => Opcode::OpenSessionRequest,
            0x02 => Opcode::OpenSessionResponse,
            0x03 => Opcode::InvocationRequest,
            0x05 => Opcode::InvocationResponse,
            0x06 => Opcode::ApplicationException,
            0x0A => Opcode::NoSuchEjb,
            0x0B => Opcode::NoSuchMethod,
            0x0C => Opcode::SessionNotActive,
            0x0D => Opcode::EjbNotStateful,
            0x0E => Opcode::ProceedAsyncResponse,
            0x1B => Opcode::CompressedInvocationMessage,
            _ => return None,
        })
    }

    /// Convert to the wire byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether an inbound frame with this opcode retires the invocation.
    ///
    /// Only [`Opcode::ProceedAsyncResponse`] leaves the invocation
    /// registered: the eventual real response still arrives under the same
    /// id.
    pub fn is_terminal(self) -> bool {
        self != Opcode::ProceedAsyncResponse
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::OpenSessionRequest => "open-session-request",
            Opcode::OpenSessionResponse => "open-session-response",
            Opcode::InvocationRequest => "invocation-request",
            Opcode::InvocationResponse => "invocation-response",
            Opcode::ApplicationException => "application-exception",
            Opcode::NoSuchEjb => "no-such-ejb",
            Opcode::NoSuchMethod => "no-such-method",
            Opcode::SessionNotActive => "session-not-active",
            Opcode::EjbNotStateful => "ejb-not-stateful",
            Opcode::ProceedAsyncResponse => "proceed-async-response",
            Opcode::CompressedInvocationMessage => "compressed-invocation-message",
        };
        write!(f, "{} (0x{:02x})", name, self.as_u8())
    }
}
