//! Outbound request encoding.
//!
//! Every request frame is `opcode u8, id u16 BE, body`. Session-open bodies
//! are four plain length-prefixed strings; invocation bodies are a codec
//! stream whose layout depends on the negotiated version.

use shrike_core::{
    CodecConfig, Error, Locator, Opcode, PRIVATE_ATTACHMENTS_KEY, TRANSACTION_ID_KEY, Value, wire,
};

use crate::receiver::{AttachmentKey, InvocationRequest};

/// Encode an open-session request. No codec stream is started.
pub(crate) fn write_open_session_request(
    buf: &mut Vec<u8>,
    id: u16,
    locator: &Locator,
) -> Result<(), Error> {
    buf.push(Opcode::OpenSessionRequest.as_u8());
    buf.extend_from_slice(&id.to_be_bytes());
    wire::write_modified_utf8(buf, &locator.app_name)?;
    wire::write_modified_utf8(buf, &locator.module_name)?;
    wire::write_modified_utf8(buf, &locator.bean_name)?;
    wire::write_modified_utf8(buf, &locator.distinct_name)?;
    Ok(())
}

/// Encode a method-invocation request per the negotiated version.
pub(crate) fn write_invocation_request(
    buf: &mut Vec<u8>,
    id: u16,
    codec: &CodecConfig,
    request: &InvocationRequest,
) -> Result<(), Error> {
    buf.push(Opcode::InvocationRequest.as_u8());
    buf.extend_from_slice(&id.to_be_bytes());

    let mut m = codec.marshaller(buf);
    if codec.protocol_version() < 3 {
        // Method identified by name plus signature string; the locator
        // name parts travel as individual objects ahead of the locator.
        m.write_utf(&request.method.method_name)?;
        m.write_utf(&request.method.signature())?;
        m.write_object(&Value::String(request.locator.app_name.clone()))?;
        m.write_object(&Value::String(request.locator.module_name.clone()))?;
        m.write_object(&Value::String(request.locator.distinct_name.clone()))?;
        m.write_object(&Value::String(request.locator.bean_name.clone()))?;
    } else {
        m.write_object(&Value::MethodLocator(request.method.clone()))?;
    }
    m.write_object(&Value::Locator(request.locator.clone()))?;

    for param in &request.parameters {
        m.write_object(param)?;
    }

    let has_private = !request.private_attachments.is_empty();
    // On legacy streams the transaction id is counted and written a second
    // time under its own reserved key; the codec back-reference keeps the
    // payload from being serialized twice.
    let duplicate_transaction = if codec.protocol_version() < 3 {
        request
            .private_attachments
            .iter()
            .find(|(key, _)| *key == AttachmentKey::TransactionId)
            .map(|(_, value)| value)
    } else {
        None
    };

    let total = request.context_data.len()
        + usize::from(has_private)
        + usize::from(duplicate_transaction.is_some());
    m.write_packed_uint(total as u64);

    for (key, value) in &request.context_data {
        m.write_object(&Value::String(key.clone()))?;
        m.write_object(value)?;
    }

    if has_private {
        m.write_object(&Value::String(PRIVATE_ATTACHMENTS_KEY.to_owned()))?;
        m.write_object(&private_map(&request.private_attachments))?;
    }

    if let Some(transaction_id) = duplicate_transaction {
        m.write_object(&Value::String(TRANSACTION_ID_KEY.to_owned()))?;
        m.write_object(transaction_id)?;
    }

    m.finish()
}

fn private_map(attachments: &[(AttachmentKey, Value)]) -> Value {
    Value::Map(
        attachments
            .iter()
            .map(|(key, value)| (Value::String(key.wire_key().to_owned()), value.clone()))
            .collect(),
    )
}
