//! Outbound frame slots bounded by a write-credit counter.
//!
//! Credit is one semaphore permit per in-flight outbound message, with the
//! initial permit count taken from the transport's advertised window. A
//! caller obtains a slot with [`FrameIo::get_message`], which suspends while
//! credit is zero; the permit travels inside the [`OutFrame`] and is
//! released when the frame is sent or cancelled, never both.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use shrike_core::Error;

use crate::transport::{MessageChannel, TransportError};

pub(crate) struct FrameIo {
    channel: MessageChannel,
    credits: Arc<Semaphore>,
}

impl FrameIo {
    pub fn new(channel: MessageChannel) -> Self {
        let credits = Arc::new(Semaphore::new(channel.window() as usize));
        FrameIo { channel, credits }
    }

    /// Obtain an outbound frame slot, waiting for write credit.
    pub async fn get_message(&self) -> Result<OutFrame, Error> {
        let permit = self
            .credits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ChannelClosed)?;

        Ok(OutFrame {
            body: Vec::new(),
            channel: self.channel.clone(),
            _permit: permit,
        })
    }

    /// Wake every credit waiter with a closed error.
    pub fn close(&self) {
        self.credits.close();
    }

    #[cfg(test)]
    pub fn available_credits(&self) -> usize {
        self.credits.available_permits()
    }
}

/// One reserved outbound message slot.
pub(crate) struct OutFrame {
    body: Vec<u8>,
    channel: MessageChannel,
    _permit: OwnedSemaphorePermit,
}

impl OutFrame {
    /// The frame body under construction.
    pub fn body(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    /// Transmit the frame. The credit unit is released once the transport
    /// has taken the message.
    pub async fn send(self) -> Result<(), TransportError> {
        self.channel.send_message(Bytes::from(self.body)).await
    }

    /// Abandon the frame without transmitting; the credit unit is released.
    pub fn cancel(self) {}
}
