//! Version negotiation.
//!
//! The server speaks first: the greeting's leading byte is the highest
//! protocol version it supports, the remainder is padding. The client picks
//! `min(server, MAX_VERSION)` and answers with the chosen version followed
//! by the codec tag. The exchange has side effects on the wire, so it runs
//! exactly once per connection (see `RemoteConnection`).

use shrike_core::{CODEC_TAG, Error, MAX_VERSION};

use crate::transport::MessageChannel;

/// Run the greeting exchange and return the negotiated protocol version.
pub(crate) async fn negotiate(channel: &MessageChannel) -> Result<u8, Error> {
    let greeting = channel
        .recv_message()
        .await
        .map_err(|e| Error::HandshakeFailed(format!("reading server greeting: {}", e)))?;

    // Leading byte is the server's maximum version; the rest of the frame
    // is padding and is dropped with the buffer.
    let Some(&server_version) = greeting.first() else {
        return Err(Error::HandshakeFailed("empty server greeting".into()));
    };
    if server_version == 0 {
        return Err(Error::HandshakeFailed(
            "server offered protocol version 0".into(),
        ));
    }

    let version = server_version.min(MAX_VERSION);

    let mut reply = Vec::with_capacity(1 + CODEC_TAG.len());
    reply.push(version);
    reply.extend_from_slice(&CODEC_TAG);
    channel
        .send_message(reply.into())
        .await
        .map_err(|e| Error::HandshakeFailed(format!("sending version reply: {}", e)))?;

    tracing::debug!(server_version, version, "negotiated protocol version");
    Ok(version)
}
