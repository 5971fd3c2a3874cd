//! Trust subcommands: pin, inspect and audit peer identity keys.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::Write;

use anyhow::{Context as _, Result, bail};
use clap::Subcommand;

use cipherline_client::VerificationStatus;
use cipherline_crypto::{
    compare_fingerprints, decode_public_key, fingerprint, fingerprint_randomart,
    format_fingerprint_display,
};

use crate::context::Context;

/// Trust subcommand actions.
#[derive(Subcommand, Debug)]
pub enum TrustAction {
    /// Show a peer key's fingerprint and pin it after confirmation
    Pin {
        /// Peer user ID
        peer: String,
        /// Peer public key (base64)
        #[arg(long)]
        key: String,
        /// Fingerprint read out by the peer; pinning is refused on mismatch
        #[arg(long)]
        expect: Option<String>,
        /// Pin without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Check a peer key against the pinned one
    Status {
        /// Peer user ID
        peer: String,
        /// Peer public key (base64)
        #[arg(long)]
        key: String,
    },
    /// List current and superseded pins for a peer
    History {
        /// Peer user ID
        peer: String,
    },
}

/// Pin `key` for `peer` once `confirm` approves the displayed fingerprint.
pub async fn pin<F>(
    ctx: &Context,
    peer: &str,
    key: &str,
    expect: Option<&str>,
    confirm: F,
    out: &mut impl Write,
) -> Result<()>
where
    F: FnOnce(&str) -> Result<bool>,
{
    let public_key = decode_public_key(key).context("Invalid peer public key")?;
    let fp = fingerprint(public_key.as_bytes());

    if let Some(expected) = expect {
        let (art, matches) = compare_fingerprints(&normalize(expected), "expected", &fp, peer);
        writeln!(out, "{art}")?;
        if !matches {
            bail!("Fingerprint for {peer} does not match the expected value");
        }
    } else {
        writeln!(out, "{}", fingerprint_randomart(&fp, peer))?;
        writeln!(out, "{}", format_fingerprint_display(&fp))?;
    }

    let status = ctx.trust.status(&ctx.user_id, peer, &public_key).await?;
    if status == VerificationStatus::Changed {
        writeln!(out, "WARNING: this key replaces the one previously pinned for {peer}")?;
    }

    if !confirm(&format!("Does this match the fingerprint {peer} reads to you?"))? {
        writeln!(out, "Not pinned")?;
        return Ok(());
    }

    let pinned = ctx.trust.pin(&ctx.user_id, peer, &public_key).await?;
    writeln!(out, "Pinned {peer} ({})", pinned.fingerprint)?;
    Ok(())
}

pub async fn status(ctx: &Context, peer: &str, key: &str, out: &mut impl Write) -> Result<()> {
    let public_key = decode_public_key(key).context("Invalid peer public key")?;
    let status = ctx.trust.status(&ctx.user_id, peer, &public_key).await?;
    writeln!(out, "{peer}: {status}")?;
    writeln!(out, "  presented: {}", fingerprint(public_key.as_bytes()))?;
    if let Some(active) = ctx.trust.active_pin(&ctx.user_id, peer).await? {
        writeln!(out, "  pinned:    {}", active.fingerprint)?;
    }
    Ok(())
}

pub async fn history(ctx: &Context, peer: &str, out: &mut impl Write) -> Result<()> {
    let pins = ctx.trust.pin_history(&ctx.user_id, peer).await?;
    if pins.is_empty() {
        writeln!(out, "No pins for {peer}")?;
        return Ok(());
    }
    for pin in pins {
        match pin.superseded_at {
            None => writeln!(out, "{}  pinned {}  active", pin.fingerprint, pin.pinned_at)?,
            Some(at) => writeln!(
                out,
                "{}  pinned {}  superseded {at}",
                pin.fingerprint, pin.pinned_at
            )?,
        }
    }
    Ok(())
}

/// Accept fingerprints typed with any grouping or case.
fn normalize(typed: &str) -> String {
    let digits: Vec<char> = typed
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    digits
        .chunks(4)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::tests::memory_context;
    use cipherline_crypto::{KeyPair, encode_public_key};

    fn peer_key() -> (String, String) {
        let kp = KeyPair::generate().unwrap();
        let fp = fingerprint(kp.public_key().as_bytes());
        (encode_public_key(kp.public_key()), fp)
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn normalize_regroups_typed_fingerprints() {
        assert_eq!(normalize("AB12CD34-ef56"), "ab12 cd34 ef56");
        assert_eq!(normalize(" ab12  cd34 "), "ab12 cd34");
    }

    #[tokio::test]
    async fn declined_confirmation_does_not_pin() {
        let ctx = memory_context("alice").await;
        let (key, _) = peer_key();

        let mut out = Vec::new();
        pin(&ctx, "bob", &key, None, |_| Ok(false), &mut out)
            .await
            .unwrap();
        assert!(text(out).contains("Not pinned"));
        assert!(ctx.trust.active_pin("alice", "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expected_fingerprint_mismatch_refuses() {
        let ctx = memory_context("alice").await;
        let (key, _) = peer_key();
        let (_, other_fp) = peer_key();

        let result = pin(
            &ctx,
            "bob",
            &key,
            Some(other_fp.as_str()),
            |_| Ok(true),
            &mut Vec::new(),
        )
        .await;
        assert!(result.is_err());
        assert!(ctx.trust.active_pin("alice", "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repin_after_change_is_recorded_in_history() {
        let ctx = memory_context("alice").await;
        let (first, first_fp) = peer_key();
        let (second, second_fp) = peer_key();

        let typed = first_fp.to_uppercase();
        pin(&ctx, "bob", &first, Some(&typed), |_| Ok(true), &mut Vec::new())
            .await
            .unwrap();

        let mut out = Vec::new();
        status(&ctx, "bob", &second, &mut out).await.unwrap();
        assert!(text(out).starts_with("bob: changed"));

        let mut out = Vec::new();
        pin(&ctx, "bob", &second, None, |_| Ok(true), &mut out)
            .await
            .unwrap();
        assert!(text(out).contains("WARNING"));

        let mut out = Vec::new();
        history(&ctx, "bob", &mut out).await.unwrap();
        let lines: Vec<String> = text(out).lines().map(str::to_string).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&first_fp) && lines[0].contains("superseded"));
        assert!(lines[1].starts_with(&second_fp) && lines[1].ends_with("active"));
    }

    #[tokio::test]
    async fn invalid_key_is_rejected() {
        let ctx = memory_context("alice").await;
        assert!(status(&ctx, "bob", "not-a-key", &mut Vec::new()).await.is_err());
    }
}
