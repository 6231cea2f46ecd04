//! Transport over any ordered duplex byte stream.
//!
//! Each message is length-prefixed with a packed unsigned integer followed
//! by the message bytes. An inbound length above the configured limit is a
//! protocol violation and fails the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use shrike_core::wire;

use super::{TransportBackend, TransportError};

/// Default maximum inbound message size (8 MB).
const DEFAULT_MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Outbound message window advertised for stream transports.
const DEFAULT_WINDOW: u32 = 64;

#[derive(Clone)]
pub struct StreamChannel {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    reader: AsyncMutex<Box<dyn AsyncRead + Unpin + Send + Sync>>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send + Sync>>,
    closed: AtomicBool,
    max_message_size: AtomicUsize,
}

impl std::fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel").finish_non_exhaustive()
    }
}

impl StreamChannel {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        StreamChannel {
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(Box::new(reader)),
                writer: AsyncMutex::new(Box::new(writer)),
                closed: AtomicBool::new(false),
                max_message_size: AtomicUsize::new(DEFAULT_MAX_MESSAGE_SIZE),
            }),
        }
    }

    /// Override the inbound message size limit.
    pub fn set_max_message_size(&self, size: usize) {
        self.inner.max_message_size.store(size, Ordering::Release);
    }

    /// Create a connected pair over an in-process duplex pipe.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        (Self::new(a), Self::new(b))
    }
}

/// Result of reading a length prefix from the stream.
enum LenPrefix {
    Value(u64),
    /// Stream ended cleanly before any prefix byte: a graceful close.
    CleanEof,
    /// Stream ended mid-prefix.
    Truncated,
    /// Prefix exceeded the packed-integer length limit.
    TooLong,
}

async fn read_len_prefix<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<LenPrefix, std::io::Error> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for bytes_read in 0..wire::MAX_PACKED_LEN {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(if bytes_read == 0 {
                    LenPrefix::CleanEof
                } else {
                    LenPrefix::Truncated
                });
            }
            Err(e) => return Err(e),
        }

        value |= ((byte[0] & 0x7F) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(LenPrefix::Value(value));
        }
        shift += 7;
    }

    Ok(LenPrefix::TooLong)
}

impl TransportBackend for StreamChannel {
    async fn send_message(&self, msg: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut framed = Vec::with_capacity(msg.len() + wire::MAX_PACKED_LEN);
        wire::write_packed_uint(&mut framed, msg.len() as u64);
        framed.extend_from_slice(&msg);

        let mut writer = self.inner.writer.lock().await;
        writer
            .write_all(&framed)
            .await
            .map_err(TransportError::Io)?;
        writer.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    async fn recv_message(&self) -> Result<Bytes, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut reader = self.inner.reader.lock().await;

        let len = match read_len_prefix(&mut *reader).await {
            Ok(LenPrefix::Value(len)) => len as usize,
            Ok(LenPrefix::CleanEof) => return Err(TransportError::Closed),
            Ok(LenPrefix::Truncated) => {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended before message length prefix terminated",
                )));
            }
            Ok(LenPrefix::TooLong) => {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "message length prefix exceeds 10 bytes",
                )));
            }
            Err(e) => return Err(TransportError::Io(e)),
        };

        let max = self.inner.max_message_size.load(Ordering::Acquire);
        if len > max {
            return Err(TransportError::MessageTooLarge { len, max });
        }

        let mut buf = vec![0u8; len];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(TransportError::Io)?;

        Ok(Bytes::from(buf))
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn window(&self) -> u32 {
        DEFAULT_WINDOW
    }
}
