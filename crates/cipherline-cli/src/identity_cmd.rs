//! Identity and vault subcommands.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::Write;

use anyhow::{Result, bail};

use cipherline_client::VaultError;
use cipherline_core::config::ResolvedSessionCache;
use cipherline_crypto::{
    PublicKey, encode_public_key, fingerprint, fingerprint_randomart, format_fingerprint_display,
};

use crate::context::Context;

/// Check that signup may proceed. An existing identity is only replaced
/// when `confirm` approves; messages wrapped for it become unreadable.
pub async fn ensure_can_replace<F>(ctx: &Context, confirm: F) -> Result<()>
where
    F: FnOnce(&str) -> Result<bool>,
{
    if !ctx.vault.has_identity(&ctx.user_id).await? {
        return Ok(());
    }
    let question = format!(
        "An identity for {} exists. Replace it? Messages sent to it become unreadable",
        ctx.user_id
    );
    if !confirm(&question)? {
        bail!("Aborted; the existing identity for {} was kept", ctx.user_id);
    }
    Ok(())
}

/// Generate and seal a new identity, then unlock it.
///
/// Replaces any identity already sealed for the user.
pub async fn signup(ctx: &Context, password: &str, out: &mut impl Write) -> Result<()> {
    let public_key = ctx.vault.generate_identity(&ctx.user_id, password).await?;
    ctx.vault.unlock(&ctx.user_id, password).await?;

    writeln!(out, "Identity created for {}", ctx.user_id)?;
    write_public_key(out, &public_key)?;
    write_cache_note(ctx, out)?;
    Ok(())
}

pub async fn unlock(ctx: &Context, password: &str, out: &mut impl Write) -> Result<()> {
    match ctx.vault.unlock(&ctx.user_id, password).await {
        Ok(_) => {}
        Err(VaultError::UnlockFailed) => {
            bail!("Unable to unlock: wrong password or no identity for {}", ctx.user_id)
        }
        Err(e) => return Err(e.into()),
    }
    writeln!(out, "Vault unlocked for {}", ctx.user_id)?;
    write_cache_note(ctx, out)?;
    Ok(())
}

/// Revoke the cached session, if any.
pub async fn lock(ctx: &Context, out: &mut impl Write) -> Result<()> {
    let was_unlocked = ctx.vault.recover_session_key(&ctx.user_id).await?.is_some();
    ctx.vault.lock().await;
    if was_unlocked {
        writeln!(out, "Vault locked")?;
    } else {
        writeln!(out, "Vault already locked")?;
    }
    Ok(())
}

/// Destroy the sealed identity. Messages wrapped for it become unreadable.
pub async fn logout(ctx: &Context, out: &mut impl Write) -> Result<()> {
    ctx.vault.logout(&ctx.user_id).await?;
    writeln!(out, "Sealed identity removed for {}", ctx.user_id)?;
    Ok(())
}

/// Print the user's own fingerprint. Works while locked.
pub async fn show_fingerprint(ctx: &Context, randomart: bool, out: &mut impl Write) -> Result<()> {
    let Some(public_key) = ctx.vault.identity_public_key(&ctx.user_id).await? else {
        bail!("No identity for {}; run `cipherline signup` first", ctx.user_id);
    };
    write_public_key(out, &public_key)?;
    if randomart {
        let fp = fingerprint(public_key.as_bytes());
        writeln!(out, "{}", fingerprint_randomart(&fp, &ctx.user_id))?;
    }
    Ok(())
}

pub async fn status(ctx: &Context, out: &mut impl Write) -> Result<()> {
    writeln!(out, "User:     {}", ctx.user_id)?;
    let Some(public_key) = ctx.vault.identity_public_key(&ctx.user_id).await? else {
        writeln!(out, "Identity: none")?;
        return Ok(());
    };
    writeln!(out, "Identity: {}", fingerprint(public_key.as_bytes()))?;

    let unlocked = ctx.vault.recover_session_key(&ctx.user_id).await?.is_some();
    writeln!(
        out,
        "Vault:    {}",
        if unlocked { "unlocked" } else { "locked" }
    )?;
    writeln!(out, "Cache:    {}", cache_label(&ctx.session_cache))?;
    Ok(())
}

fn write_public_key(out: &mut impl Write, public_key: &PublicKey) -> Result<()> {
    writeln!(out, "Public key:  {}", encode_public_key(public_key))?;
    writeln!(out, "Fingerprint:")?;
    for line in format_fingerprint_display(&fingerprint(public_key.as_bytes())).lines() {
        writeln!(out, "  {line}")?;
    }
    Ok(())
}

fn write_cache_note(ctx: &Context, out: &mut impl Write) -> Result<()> {
    match ctx.session_cache {
        ResolvedSessionCache::RuntimeDir(_) => {
            writeln!(out, "Session cached until `cipherline lock` or reboot")?;
        }
        ResolvedSessionCache::Disabled | ResolvedSessionCache::Memory => {
            writeln!(out, "Session cache is process-local; the key is dropped on exit")?;
        }
    }
    Ok(())
}

fn cache_label(cache: &ResolvedSessionCache) -> String {
    match cache {
        ResolvedSessionCache::Disabled => "disabled".to_string(),
        ResolvedSessionCache::Memory => "memory (this process only)".to_string(),
        ResolvedSessionCache::RuntimeDir(dir) => dir.display().to_string(),
    }
}
