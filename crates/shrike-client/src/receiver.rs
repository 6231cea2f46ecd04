//! The surface exposed to the higher-level client.

use shrike_core::{Error, Locator, MethodLocator, Value};

use crate::response::MethodResultProducer;

/// Callbacks through which a method invocation's outcome is delivered.
///
/// `process_invocation` is fire-and-forget from the caller's perspective:
/// exactly one of [`result_ready`](Self::result_ready) or
/// [`request_cancelled`](Self::request_cancelled) fires per invocation,
/// possibly preceded by
/// [`proceed_asynchronously`](Self::proceed_asynchronously).
pub trait InvocationReceiver: Send + Sync + 'static {
    /// A terminal response arrived; pull or discard the result through the
    /// producer.
    fn result_ready(&self, producer: MethodResultProducer);

    /// The request will not produce a response (channel closed, or the
    /// request could not be written).
    fn request_cancelled(&self, error: Error);

    /// The server signalled that the request continues asynchronously; the
    /// caller may unblock. The real response still arrives later.
    fn proceed_asynchronously(&self);
}

/// One method invocation to submit on the channel.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub method: MethodLocator,
    pub locator: Locator,
    /// Parameters in declared order.
    pub parameters: Vec<Value>,
    /// Public string-keyed context data, sent as attachment pairs.
    pub context_data: Vec<(String, Value)>,
    /// Private typed attachments, sent as one wire entry under the reserved
    /// key.
    pub private_attachments: Vec<(AttachmentKey, Value)>,
}

impl InvocationRequest {
    pub fn new(method: MethodLocator, locator: Locator) -> Self {
        InvocationRequest {
            method,
            locator,
            parameters: Vec::new(),
            context_data: Vec::new(),
            private_attachments: Vec::new(),
        }
    }
}

/// Key of a private attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttachmentKey {
    /// The transaction id; duplicated under a second reserved key on v1/v2
    /// streams for backward compatibility.
    TransactionId,
    Named(String),
}

impl AttachmentKey {
    /// The string form written to the wire.
    pub fn wire_key(&self) -> &str {
        match self {
            AttachmentKey::TransactionId => shrike_core::TRANSACTION_ID_KEY,
            AttachmentKey::Named(name) => name,
        }
    }
}
