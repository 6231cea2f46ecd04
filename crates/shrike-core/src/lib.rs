//! Protocol layer for the shrike remote-invocation client.
//!
//! This crate holds everything below the channel: the opcode set and wire
//! constants, byte-level primitives (packed integers, modified UTF-8), the
//! dynamic object-graph value model, component locators, and the `river`
//! object-graph codec with its per-version configuration tables.

mod codec;
mod error;
mod locator;
mod protocol;
mod value;
pub mod wire;

pub use codec::{CodecConfig, Marshaller, Unmarshaller};
pub use error::Error;
pub use locator::{Locator, MethodLocator, StatefulLocator};
pub use protocol::{
    CHANNEL_NAME, CODEC_NAME, CODEC_TAG, MAX_VERSION, Opcode, PRIVATE_ATTACHMENTS_KEY,
    TRANSACTION_ID_KEY, WEAK_AFFINITY_KEY,
};
pub use value::{Affinity, RemoteThrowable, Value};
