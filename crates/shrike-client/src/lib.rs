//! Client-side channel for a remote component (EJB) server.
//!
//! The channel multiplexes concurrent method invocations and session-open
//! requests over one ordered message transport. On connect it negotiates a
//! protocol version and codec with the server; afterwards every request and
//! response frame carries an opcode and a 16-bit invocation id, and a single
//! reader task routes inbound frames back to the invocation that issued the
//! matching request.
//!
//! ```ignore
//! let connection = RemoteConnection::new(Connection::stream(tcp));
//! let channel = connection.client_channel().await?;
//!
//! let session = channel
//!     .open_session(Locator::new("accounts", "LedgerBean"))
//!     .await?;
//! ```

mod channel;
mod frame_io;
mod handshake;
mod receiver;
mod registry;
mod request;
mod response;
pub mod transport;

pub use channel::ClientChannel;
pub use receiver::{AttachmentKey, InvocationReceiver, InvocationRequest};
pub use response::MethodResultProducer;
pub use transport::{Connection, MemChannel, MessageChannel, RemoteConnection, StreamChannel};

// Re-export the protocol layer so callers need only one crate.
pub use shrike_core::{
    Affinity, CodecConfig, Error, Locator, MethodLocator, Opcode, RemoteThrowable,
    StatefulLocator, Value,
};
