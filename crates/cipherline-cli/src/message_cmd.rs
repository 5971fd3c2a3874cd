//! Offline seal/open of single messages.
//!
//! `seal` prints the JSON a transport would send; `open` decrypts a pushed
//! message. Both need an unlocked vault.

use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use tokio::sync::mpsc;

use cipherline_client::session::{NoHistory, open_message};
use cipherline_client::{SendError, SessionOrchestrator};
use cipherline_crypto::decode_public_key;
use cipherline_proto::{InboundEvent, InboundMessage};

use crate::context::Context;

/// Encrypt `text` for `peer` and print the outbound JSON.
///
/// Refused while the peer's key differs from its pin.
pub async fn seal(
    ctx: &Context,
    peer: &str,
    key: &str,
    text: &str,
    out: &mut impl Write,
) -> Result<()> {
    let peer_key = decode_public_key(key).context("Invalid peer public key")?;
    ctx.session_key().await?;

    let (tx, mut rx) = mpsc::channel(1);
    let mut orchestrator = SessionOrchestrator::new(
        ctx.user_id.clone(),
        Arc::clone(&ctx.vault),
        ctx.trust.clone(),
        NoHistory,
        tx,
    );
    orchestrator.set_peer_key(peer, peer_key);

    match orchestrator.send(peer, text).await {
        Ok(()) => {}
        Err(SendError::TrustChanged { peer_id }) => bail!(
            "{peer_id}'s identity key changed; verify it and run `cipherline trust pin` before sending"
        ),
        Err(e) => return Err(e.into()),
    }

    let message = rx.recv().await.context("Message was not produced")?;
    writeln!(out, "{}", serde_json::to_string(&message)?)?;
    Ok(())
}

/// Decrypt a pushed message (bare or wrapped in an event) and print it.
pub async fn open(ctx: &Context, json: &str, out: &mut impl Write) -> Result<()> {
    let message = parse_message(json)?;
    let key = ctx.session_key().await?;
    let text = open_message(&key, &message)?;
    writeln!(out, "{}: {text}", message.sender_id)?;
    Ok(())
}

fn parse_message(json: &str) -> Result<InboundMessage> {
    match InboundEvent::from_json(json) {
        Ok(InboundEvent::Message(message)) => Ok(message),
        Ok(InboundEvent::IdentityChange(change)) => {
            bail!("Event is an identity change for {}, not a message", change.user_id)
        }
        Err(_) => serde_json::from_str(json).context("Input is not a Cipherline message"),
    }
}

/// `-` reads the argument from stdin.
pub fn read_arg(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::tests::memory_context;
    use cipherline_crypto::{KeyPair, encode_public_key};
    use cipherline_proto::OutboundMessage;

    async fn unlocked(user_id: &str) -> (Context, String) {
        let ctx = memory_context(user_id).await;
        let public = ctx.vault.generate_identity(user_id, "pw").await.unwrap();
        ctx.vault.unlock(user_id, "pw").await.unwrap();
        (ctx, encode_public_key(&public))
    }

    fn pushed(json: &str, sender_id: &str) -> String {
        let out: OutboundMessage = serde_json::from_str(json.trim()).unwrap();
        let message = InboundMessage {
            id: 7,
            sender_id: sender_id.into(),
            recipient_id: out.recipient_id,
            ciphertext: out.ciphertext,
            iv: out.iv,
            encrypted_key_for_recipient: out.encrypted_key_for_recipient,
            encrypted_key_for_sender: out.encrypted_key_for_sender,
            timestamp: 0,
        };
        InboundEvent::Message(message).to_json().unwrap()
    }

    #[tokio::test]
    async fn sealed_message_opens_for_recipient_and_sender() {
        let (alice, _) = unlocked("alice").await;
        let (bob, bob_key) = unlocked("bob").await;

        let mut sealed = Vec::new();
        seal(&alice, "bob", &bob_key, "hi bob", &mut sealed)
            .await
            .unwrap();
        let event = pushed(&String::from_utf8(sealed).unwrap(), "alice");

        let mut out = Vec::new();
        open(&bob, &event, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "alice: hi bob\n");

        let mut out = Vec::new();
        open(&alice, &event, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "alice: hi bob\n");
    }

    #[tokio::test]
    async fn changed_peer_key_blocks_seal() {
        let (alice, _) = unlocked("alice").await;
        let old = KeyPair::generate().unwrap();
        let new = KeyPair::generate().unwrap();
        alice.trust.pin("alice", "bob", old.public_key()).await.unwrap();

        let err = seal(
            &alice,
            "bob",
            &encode_public_key(new.public_key()),
            "hi",
            &mut Vec::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("cipherline trust pin"));
    }

    #[tokio::test]
    async fn locked_vault_blocks_seal() {
        let (alice, _) = unlocked("alice").await;
        let bob = KeyPair::generate().unwrap();
        alice.vault.lock().await;

        let err = seal(
            &alice,
            "bob",
            &encode_public_key(bob.public_key()),
            "hi",
            &mut Vec::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("locked"));
    }

    #[test]
    fn identity_change_is_not_a_message() {
        let json = r#"{"type":"identity_change","user_id":"bob","new_public_key":"AAAA"}"#;
        assert!(parse_message(json).is_err());
        assert!(parse_message("{}").is_err());
    }

    #[test]
    fn read_arg_passes_plain_values_through() {
        assert_eq!(read_arg("hello").unwrap(), "hello");
    }
}
