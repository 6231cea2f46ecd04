//! Message transport abstraction.
//!
//! The channel core only needs an ordered, bidirectional stream of discrete
//! byte messages. Each backend lives in its own module under `transport/`
//! and implements the internal [`TransportBackend`] trait; the public API is
//! the [`MessageChannel`] enum.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::OnceCell;

use shrike_core::{CHANNEL_NAME, Error};

use crate::channel::ClientChannel;

pub use mem::MemChannel;
pub use stream::StreamChannel;

pub mod mem;
pub mod stream;

/// Transport-level failures, below the protocol error model.
#[derive(Debug)]
pub enum TransportError {
    /// The channel is closed.
    Closed,

    /// An I/O error on the underlying stream.
    Io(std::io::Error),

    /// An inbound message exceeded the configured size limit.
    MessageTooLarge { len: usize, max: usize },

    /// The named channel cannot be opened on this connection.
    ChannelUnavailable(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport closed"),
            TransportError::Io(e) => write!(f, "transport i/o error: {}", e),
            TransportError::MessageTooLarge { len, max } => {
                write!(f, "inbound message of {} bytes exceeds limit {}", len, max)
            }
            TransportError::ChannelUnavailable(name) => {
                write!(f, "channel \"{}\" is not available on this connection", name)
            }
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

pub(crate) trait TransportBackend: Send + Sync + Clone + 'static {
    async fn send_message(&self, msg: Bytes) -> Result<(), TransportError>;
    async fn recv_message(&self) -> Result<Bytes, TransportError>;
    fn close(&self);
    fn is_closed(&self) -> bool;
    /// Outbound message window advertised by the transport; the channel's
    /// initial write credit.
    fn window(&self) -> u32;
}

/// One framed, bidirectional message stream.
#[derive(Clone, Debug)]
pub enum MessageChannel {
    Mem(MemChannel),
    Stream(StreamChannel),
}

impl MessageChannel {
    pub async fn send_message(&self, msg: Bytes) -> Result<(), TransportError> {
        match self {
            MessageChannel::Mem(c) => c.send_message(msg).await,
            MessageChannel::Stream(c) => c.send_message(msg).await,
        }
    }

    pub async fn recv_message(&self) -> Result<Bytes, TransportError> {
        match self {
            MessageChannel::Mem(c) => c.recv_message().await,
            MessageChannel::Stream(c) => c.recv_message().await,
        }
    }

    pub fn close(&self) {
        match self {
            MessageChannel::Mem(c) => c.close(),
            MessageChannel::Stream(c) => c.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            MessageChannel::Mem(c) => c.is_closed(),
            MessageChannel::Stream(c) => c.is_closed(),
        }
    }

    pub fn window(&self) -> u32 {
        match self {
            MessageChannel::Mem(c) => c.window(),
            MessageChannel::Stream(c) => c.window(),
        }
    }
}

/// One transport connection, from which named channels are opened.
///
/// Both backends carry a single protocol channel per connection; opening
/// the same name twice fails.
pub struct Connection {
    channel: parking_lot::Mutex<Option<MessageChannel>>,
}

impl Connection {
    /// Wrap a pre-created in-memory channel.
    pub fn mem(channel: MemChannel) -> Self {
        Connection::from_channel(MessageChannel::Mem(channel))
    }

    /// Wrap a connected duplex byte stream (a TCP connection, typically).
    pub fn stream<S>(io: S) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync + 'static,
    {
        Connection::from_channel(MessageChannel::Stream(StreamChannel::new(io)))
    }

    pub fn from_channel(channel: MessageChannel) -> Self {
        Connection {
            channel: parking_lot::Mutex::new(Some(channel)),
        }
    }

    /// Open the named channel on this connection.
    pub async fn open_channel(&self, name: &str) -> Result<MessageChannel, TransportError> {
        if name != CHANNEL_NAME {
            return Err(TransportError::ChannelUnavailable(name.to_owned()));
        }
        self.channel
            .lock()
            .take()
            .ok_or_else(|| TransportError::ChannelUnavailable(name.to_owned()))
    }
}

/// A connection plus its memoized client channel.
///
/// The handshake has side effects on the wire, so it runs at most once per
/// connection; concurrent and later callers observe the same outcome,
/// success or failure.
pub struct RemoteConnection {
    connection: Connection,
    channel: OnceCell<Result<Arc<ClientChannel>, Error>>,
}

impl RemoteConnection {
    pub fn new(connection: Connection) -> Self {
        RemoteConnection {
            connection,
            channel: OnceCell::new(),
        }
    }

    /// Obtain the channel for this connection, performing the handshake on
    /// first use.
    pub async fn client_channel(&self) -> Result<Arc<ClientChannel>, Error> {
        self.channel
            .get_or_init(|| async {
                ClientChannel::connect(&self.connection).await.map(Arc::new)
            })
            .await
            .clone()
    }
}
