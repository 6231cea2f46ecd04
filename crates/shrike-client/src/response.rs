//! Inbound response handling.
//!
//! Two record kinds live in the registry: session opens, completed through
//! a oneshot, and method invocations, completed by handing the receiver a
//! lazy result producer. Records interpret opcodes themselves; the
//! dispatcher only routes.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use flate2::read::DeflateDecoder;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use shrike_core::{
    Error, Locator, Opcode, StatefulLocator, Unmarshaller, Value, WEAK_AFFINITY_KEY, wire,
};

use crate::channel::ChannelShared;
use crate::receiver::InvocationReceiver;
use crate::registry::PendingInvocation;

/// A pending session-open request.
pub(crate) struct SessionOpenInvocation {
    stateless: Locator,
    shared: Arc<ChannelShared>,
    tx: Mutex<Option<oneshot::Sender<Result<StatefulLocator, Error>>>>,
}

impl SessionOpenInvocation {
    pub fn new(
        stateless: Locator,
        shared: Arc<ChannelShared>,
    ) -> (Arc<Self>, oneshot::Receiver<Result<StatefulLocator, Error>>) {
        let (tx, rx) = oneshot::channel();
        let record = Arc::new(SessionOpenInvocation {
            stateless,
            shared,
            tx: Mutex::new(Some(tx)),
        });
        (record, rx)
    }

    fn complete(&self, outcome: Result<StatefulLocator, Error>) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
    }
}

impl PendingInvocation for SessionOpenInvocation {
    fn handle_response(&self, opcode: u8, payload: Bytes) {
        let outcome = decode_session_open(opcode, payload, &self.shared, &self.stateless);
        self.complete(outcome);
    }

    fn handle_closed(&self) {
        self.complete(Err(Error::ChannelClosed));
    }
}

fn decode_session_open(
    opcode: u8,
    payload: Bytes,
    shared: &ChannelShared,
    stateless: &Locator,
) -> Result<StatefulLocator, Error> {
    match Opcode::from_u8(opcode) {
        Some(Opcode::OpenSessionResponse) => {
            let mut cur = wire::ByteCursor::new(payload);
            let len = wire::read_packed_uint(&mut cur)? as usize;
            let session_id = cur.read_bytes(len)?.to_vec();

            let mut u = shared.codec.unmarshaller(cur.remaining_bytes())?;
            let affinity = match u.read_object()? {
                Value::Affinity(affinity) => affinity,
                other => {
                    return Err(Error::protocol(format!(
                        "session-open response carries a {} where an affinity belongs",
                        other.kind()
                    )));
                }
            };
            u.finish()?;

            Ok(StatefulLocator {
                stateless: stateless.clone(),
                session_id,
                affinity,
            })
        }
        Some(Opcode::ApplicationException) => Err(decode_application_exception(payload, shared)),
        Some(Opcode::NoSuchEjb) => Err(Error::TargetMissing(read_message(payload)?)),
        Some(Opcode::EjbNotStateful) => Err(Error::NotStateful(read_message(payload)?)),
        Some(Opcode::SessionNotActive) => Err(Error::SessionInactive(read_message(payload)?)),
        _ => Err(Error::protocol(format!(
            "unexpected opcode 0x{:02x} for a session-open invocation",
            opcode
        ))),
    }
}

/// A pending method invocation.
///
/// Completion is guarded so that exactly one of the terminal receiver
/// callbacks fires, no matter how `handle_response`, `handle_closed`, and
/// write-failure cancellation race.
pub(crate) struct MethodInvocation {
    receiver: Arc<dyn InvocationReceiver>,
    shared: Arc<ChannelShared>,
    completed: AtomicBool,
}

impl MethodInvocation {
    pub fn new(receiver: Arc<dyn InvocationReceiver>, shared: Arc<ChannelShared>) -> Arc<Self> {
        Arc::new(MethodInvocation {
            receiver,
            shared,
            completed: AtomicBool::new(false),
        })
    }

    fn begin_completion(&self) -> bool {
        !self.completed.swap(true, Ordering::SeqCst)
    }

    /// Terminate without a response (write failure or closure).
    pub fn complete_cancelled(&self, error: Error) {
        if self.begin_completion() {
            self.receiver.request_cancelled(error);
        }
    }
}

impl PendingInvocation for MethodInvocation {
    fn handle_response(&self, opcode: u8, payload: Bytes) {
        if opcode == Opcode::ProceedAsyncResponse.as_u8() {
            // Not terminal: the invocation stays registered and the real
            // response still arrives under the same id.
            self.receiver.proceed_asynchronously();
            return;
        }

        if self.begin_completion() {
            self.receiver.result_ready(MethodResultProducer {
                opcode,
                payload,
                shared: self.shared.clone(),
            });
        }
    }

    fn handle_closed(&self) {
        self.complete_cancelled(Error::ChannelClosed);
    }
}

/// Lazy result carrier handed to [`InvocationReceiver::result_ready`].
///
/// The payload is decoded only when [`get_result`](Self::get_result) is
/// pulled; [`discard_result`](Self::discard_result) drops it unexamined.
pub struct MethodResultProducer {
    opcode: u8,
    payload: Bytes,
    shared: Arc<ChannelShared>,
}

impl MethodResultProducer {
    /// Decode the response into a result value.
    ///
    /// Recognized response attachments update the client context (notably
    /// the weak-affinity hint); unrecognized ones are discarded.
    pub fn get_result(self) -> Result<Value, Error> {
        match Opcode::from_u8(self.opcode) {
            Some(Opcode::InvocationResponse) => decode_invocation_result(self.payload, &self.shared),
            Some(Opcode::CompressedInvocationMessage) => {
                let body = inflate(&self.payload)?;
                decode_invocation_result(body, &self.shared)
            }
            Some(Opcode::ApplicationException) => {
                Err(decode_application_exception(self.payload, &self.shared))
            }
            Some(Opcode::NoSuchEjb) => Err(Error::TargetMissing(read_message(self.payload)?)),
            Some(Opcode::NoSuchMethod) => Err(Error::MethodMissing(read_message(self.payload)?)),
            Some(Opcode::SessionNotActive) => {
                Err(Error::SessionInactive(read_message(self.payload)?))
            }
            _ => Err(Error::protocol(format!(
                "unexpected response opcode 0x{:02x}",
                self.opcode
            ))),
        }
    }

    /// Close the payload without decoding it.
    pub fn discard_result(self) {}
}

fn decode_invocation_result(payload: Bytes, shared: &ChannelShared) -> Result<Value, Error> {
    let mut u = shared.codec.unmarshaller(payload)?;
    let result = u.read_object()?;

    let attachments = u.read_u8()?;
    for _ in 0..attachments {
        let key = u.read_object()?;
        let value = u.read_object()?;
        match key.as_str() {
            Some(WEAK_AFFINITY_KEY) => match value {
                Value::Affinity(affinity) => shared.context.set_weak_affinity(affinity),
                other => {
                    tracing::warn!(
                        kind = other.kind(),
                        "weak-affinity attachment is not an affinity; ignoring"
                    );
                }
            },
            Some(key) => {
                tracing::debug!(key, "discarding unrecognized response attachment");
            }
            None => {
                tracing::warn!(
                    kind = key.kind(),
                    "discarding response attachment with non-string key"
                );
            }
        }
    }

    u.finish()?;
    Ok(result)
}

fn decode_application_exception(payload: Bytes, shared: &ChannelShared) -> Error {
    let decode = || -> Result<Error, Error> {
        let mut u = shared.codec.unmarshaller(payload.clone())?;
        let throwable = match u.read_object()? {
            Value::Throwable(t) => t,
            other => {
                return Err(Error::protocol(format!(
                    "application-exception response carries a {}",
                    other.kind()
                )));
            }
        };

        if shared.codec.protocol_version() < 3 {
            drain_attachments(&mut u)?;
        }

        Ok(Error::ApplicationException(throwable))
    };

    match decode() {
        Ok(error) | Err(error) => error,
    }
}

/// Read and discard a trailing attachment block.
fn drain_attachments(u: &mut Unmarshaller<'_>) -> Result<(), Error> {
    let count = u.read_u8()?;
    for _ in 0..count {
        u.read_object()?;
        u.read_object()?;
    }
    Ok(())
}

fn read_message(payload: Bytes) -> Result<String, Error> {
    let mut cur = wire::ByteCursor::new(payload);
    wire::read_modified_utf8(&mut cur)
}

fn inflate(payload: &[u8]) -> Result<Bytes, Error> {
    let mut body = Vec::new();
    DeflateDecoder::new(payload)
        .read_to_end(&mut body)
        .map_err(|e| Error::protocol(format!("inflating compressed response: {}", e)))?;
    Ok(Bytes::from(body))
}
