//! Conversions between wire messages and envelopes.

use cipherline_crypto::encoding::{decode, encode};
use cipherline_crypto::{
    CryptoError, EncryptedEnvelope, PublicKey, WrappedKey, decrypt, encrypt_for_both,
};
use cipherline_proto::{HistoryEntry, InboundMessage, OutboundMessage};

use super::conversation::MessageBody;
use crate::error::ClientError;
use crate::vault::SessionKey;

/// Parse a pushed message. Both wrapped copies are kept so the sender's own
/// echo opens too.
pub(crate) fn envelope_from_message(
    message: &InboundMessage,
) -> Result<EncryptedEnvelope, CryptoError> {
    let mut wrapped_keys = vec![WrappedKey::from_base64(
        &message.encrypted_key_for_recipient,
    )?];
    if !message.encrypted_key_for_sender.is_empty() {
        wrapped_keys.push(WrappedKey::from_base64(&message.encrypted_key_for_sender)?);
    }
    EncryptedEnvelope::new(
        decode(&message.ciphertext)?,
        &decode(&message.iv)?,
        wrapped_keys,
    )
}

/// Parse a history entry, which carries only the requester's wrapped copy.
pub(crate) fn envelope_from_history(
    entry: &HistoryEntry,
) -> Result<EncryptedEnvelope, CryptoError> {
    EncryptedEnvelope::new(
        decode(&entry.encrypted_content)?,
        &decode(&entry.iv)?,
        vec![WrappedKey::from_base64(&entry.encrypted_key)?],
    )
}

pub(crate) fn outbound_message(recipient_id: &str, envelope: &EncryptedEnvelope) -> OutboundMessage {
    OutboundMessage {
        recipient_id: recipient_id.to_string(),
        ciphertext: encode(&envelope.ciphertext),
        iv: encode(&envelope.nonce),
        encrypted_key_for_recipient: envelope.recipient_key().to_base64(),
        encrypted_key_for_sender: envelope
            .sender_key()
            .map(WrappedKey::to_base64)
            .unwrap_or_default(),
    }
}

/// Decrypt one envelope into a body. A revoked key yields `Locked`.
pub(crate) fn open_body(key: &SessionKey, envelope: Option<&EncryptedEnvelope>) -> MessageBody {
    let Some(envelope) = envelope else {
        return MessageBody::Unreadable;
    };
    match key.with_key_pair(|kp| decrypt(envelope, kp)) {
        Err(_) => MessageBody::Locked,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Message unreadable");
            MessageBody::Unreadable
        }
        Ok(Ok(bytes)) => String::from_utf8(bytes).map_or(MessageBody::Unreadable, MessageBody::Plaintext),
    }
}

/// Encrypt `text` for `recipient_key` and for the sender's own key.
///
/// CPU-bound; run it on a blocking thread from async code.
pub fn seal_message(
    sender: &SessionKey,
    recipient_id: &str,
    recipient_key: &PublicKey,
    text: &str,
) -> Result<OutboundMessage, ClientError> {
    if sender.is_revoked() {
        return Err(ClientError::VaultLocked);
    }
    let envelope = encrypt_for_both(text.as_bytes(), recipient_key, sender.public_key())
        .map_err(ClientError::Crypto)?;
    Ok(outbound_message(recipient_id, &envelope))
}

/// Decrypt a single pushed message, reporting why it failed.
pub fn open_message(key: &SessionKey, message: &InboundMessage) -> Result<String, ClientError> {
    let envelope = envelope_from_message(message).map_err(ClientError::Decryption)?;
    let plaintext = key
        .with_key_pair(|kp| decrypt(&envelope, kp))
        .map_err(|_| ClientError::VaultLocked)?
        .map_err(ClientError::Decryption)?;
    String::from_utf8(plaintext).map_err(|e| {
        ClientError::Decryption(CryptoError::InvalidEncoding(format!(
            "plaintext is not UTF-8: {e}"
        )))
    })
}
