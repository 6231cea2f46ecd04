//! The operational client channel.
//!
//! One `ClientChannel` exists per negotiated connection. Callers submit
//! requests concurrently; a single reader task drives the response
//! dispatcher, which routes each inbound frame to the pending invocation
//! holding the matching id. Transport closure is broadcast once: new
//! requests fail immediately and every pending record is notified exactly
//! once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::AbortHandle;

use shrike_core::{
    Affinity, CHANNEL_NAME, CodecConfig, Error, Locator, Opcode, StatefulLocator,
};

use crate::frame_io::FrameIo;
use crate::handshake;
use crate::receiver::{InvocationReceiver, InvocationRequest};
use crate::registry::{InvocationRegistry, PendingInvocation};
use crate::request;
use crate::response::{MethodInvocation, SessionOpenInvocation};
use crate::transport::{Connection, MessageChannel, TransportError};

/// State shared between the channel handle, the reader task, and the
/// pending-invocation records.
pub(crate) struct ChannelShared {
    pub(crate) channel: MessageChannel,
    pub(crate) codec: CodecConfig,
    pub(crate) registry: InvocationRegistry,
    pub(crate) frame_io: FrameIo,
    pub(crate) context: ClientContext,
    down: AtomicBool,
}

impl ChannelShared {
    /// Broadcast closure. Idempotent: the transport, the credit counter,
    /// and the registry are torn down once no matter who notices first.
    pub(crate) fn shutdown(&self) {
        if self.down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.channel.close();
        self.frame_io.close();
        self.registry.close_all();
        tracing::debug!("client channel closed");
    }
}

/// Client-side invocation context updated from response attachments.
pub(crate) struct ClientContext {
    weak_affinity: Mutex<Option<Affinity>>,
}

impl ClientContext {
    fn new() -> Self {
        ClientContext {
            weak_affinity: Mutex::new(None),
        }
    }

    pub(crate) fn set_weak_affinity(&self, affinity: Affinity) {
        *self.weak_affinity.lock() = Some(affinity);
    }

    fn weak_affinity(&self) -> Option<Affinity> {
        self.weak_affinity.lock().clone()
    }
}

/// A negotiated channel to a remote component server.
pub struct ClientChannel {
    shared: Arc<ChannelShared>,
    reader: AbortHandle,
}

impl ClientChannel {
    /// Open the protocol channel on `connection` and perform the handshake.
    pub async fn connect(connection: &Connection) -> Result<Self, Error> {
        let channel = connection.open_channel(CHANNEL_NAME).await.map_err(|e| {
            Error::HandshakeFailed(format!("opening channel \"{}\": {}", CHANNEL_NAME, e))
        })?;
        Self::from_channel(channel).await
    }

    /// Perform the handshake over an already-open message channel.
    pub async fn from_channel(channel: MessageChannel) -> Result<Self, Error> {
        let version = handshake::negotiate(&channel).await?;

        let shared = Arc::new(ChannelShared {
            codec: CodecConfig::for_version(version),
            frame_io: FrameIo::new(channel.clone()),
            channel,
            registry: InvocationRegistry::new(),
            context: ClientContext::new(),
            down: AtomicBool::new(false),
        });

        let reader = spawn_reader(shared.clone());
        Ok(ClientChannel { shared, reader })
    }

    /// The negotiated protocol version.
    pub fn version(&self) -> u8 {
        self.shared.codec.protocol_version()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.down.load(Ordering::SeqCst)
    }

    /// Close the channel and fail every pending invocation.
    pub fn close(&self) {
        self.shared.shutdown();
        self.reader.abort();
    }

    /// The last weak-affinity hint received from the server, if any.
    pub fn weak_affinity(&self) -> Option<Affinity> {
        self.shared.context.weak_affinity()
    }

    /// Open a stateful session for `stateless`.
    ///
    /// Suspends until the response or channel closure arrives. Dropping the
    /// returned future before completion withdraws the invocation from the
    /// registry.
    pub async fn open_session(&self, stateless: Locator) -> Result<StatefulLocator, Error> {
        stateless.validate()?;

        let (record, rx) = SessionOpenInvocation::new(stateless.clone(), self.shared.clone());
        let (id, registered) = self.shared.registry.allocate(|_| record.clone())?;

        let mut frame = match self.shared.frame_io.get_message().await {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.registry.remove(id);
                return Err(e);
            }
        };
        if let Err(e) = request::write_open_session_request(frame.body(), id, &stateless) {
            frame.cancel();
            self.shared.registry.remove(id);
            return Err(e);
        }
        if let Err(e) = frame.send().await {
            self.shared.registry.remove(id);
            return Err(send_failure(e));
        }

        let _guard = RemoveOnDrop {
            shared: self.shared.clone(),
            id,
            record: registered,
        };
        match rx.await {
            Ok(outcome) => outcome,
            // The sender can only vanish unfired if the record was dropped
            // without completion, which means the channel went down.
            Err(_) => Err(Error::ChannelClosed),
        }
    }

    /// Submit a method invocation.
    ///
    /// Fire-and-forget: every outcome is delivered through `receiver`. The
    /// call itself only suspends while waiting for write credit.
    pub async fn process_invocation(
        &self,
        invocation: InvocationRequest,
        receiver: Arc<dyn InvocationReceiver>,
    ) {
        if let Err(e) = invocation.locator.validate() {
            receiver.request_cancelled(e);
            return;
        }

        let record = MethodInvocation::new(receiver.clone(), self.shared.clone());
        let (id, _) = match self.shared.registry.allocate(|_| record.clone()) {
            Ok(allocated) => allocated,
            Err(e) => {
                receiver.request_cancelled(e);
                return;
            }
        };

        let mut frame = match self.shared.frame_io.get_message().await {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.registry.remove(id);
                record.complete_cancelled(e);
                return;
            }
        };
        if let Err(e) =
            request::write_invocation_request(frame.body(), id, &self.shared.codec, &invocation)
        {
            frame.cancel();
            self.shared.registry.remove(id);
            record.complete_cancelled(e);
            return;
        }
        if let Err(e) = frame.send().await {
            self.shared.registry.remove(id);
            record.complete_cancelled(send_failure(e));
        }
    }
}

fn send_failure(error: TransportError) -> Error {
    match error {
        TransportError::Closed => Error::ChannelClosed,
        other => Error::protocol(format!("writing request: {}", other)),
    }
}

/// Withdraws an invocation from the registry when its waiter gives up.
///
/// Removal is identity-guarded, so a record that already completed (and
/// whose id may have been reused) is left alone.
struct RemoveOnDrop {
    shared: Arc<ChannelShared>,
    id: u16,
    record: Arc<dyn PendingInvocation>,
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        self.shared.registry.remove_record(self.id, &self.record);
    }
}

fn spawn_reader(shared: Arc<ChannelShared>) -> AbortHandle {
    tokio::spawn(async move {
        loop {
            match shared.channel.recv_message().await {
                Ok(msg) => dispatch(&shared, msg),
                Err(e) => {
                    tracing::debug!(error = %e, "inbound stream terminated");
                    break;
                }
            }
        }
        shared.shutdown();
    })
    .abort_handle()
}

/// Route one inbound frame: `opcode u8, id u16 BE, payload`.
///
/// The dispatcher holds no decoder state; the record interprets the opcode
/// and payload. Terminal opcodes retire the id before delivery so it can be
/// reused immediately.
fn dispatch(shared: &Arc<ChannelShared>, msg: Bytes) {
    if msg.len() < 3 {
        tracing::warn!(len = msg.len(), "discarding unroutable inbound frame");
        return;
    }
    let opcode = msg[0];
    let id = u16::from_be_bytes([msg[1], msg[2]]);
    let payload = msg.slice(3..);

    let terminal = Opcode::from_u8(opcode).map_or(true, Opcode::is_terminal);
    let record = if terminal {
        shared.registry.remove(id)
    } else {
        shared.registry.get(id)
    };

    match record {
        Some(record) => record.handle_response(opcode, payload),
        None => {
            tracing::warn!(opcode, id, "no pending invocation for inbound frame; discarding");
        }
    }
}
