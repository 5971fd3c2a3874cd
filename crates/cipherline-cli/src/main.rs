//! Cipherline CLI
//!
//! Manages the sealed identity, the session cache and pinned peer keys, and
//! seals or opens single messages for scripting against a transport.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};

use cipherline_cli::context::Context;
use cipherline_cli::prompt::{self, PasswordSource};
use cipherline_cli::trust_cmd::{self, TrustAction};
use cipherline_cli::{identity_cmd, message_cmd};
use cipherline_core::config::load_config;
use cipherline_core::tracing_init::init_from_config;

#[derive(Parser, Debug)]
#[command(name = "cipherline")]
#[command(version, about = "End-to-end encrypted messaging client", long_about = None)]
struct Cli {
    /// User ID the command acts for
    #[arg(short, long, env = "CIPHERLINE_USER")]
    user: String,

    /// Config file (replaces the global settings.json)
    #[arg(long, global = true, env = "CIPHERLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Local database path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log level for cipherline crates (e.g. "debug")
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Read passwords from the first line of stdin instead of the terminal
    #[arg(long, global = true)]
    password_stdin: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new identity sealed under a password
    Signup {
        /// Replace an existing identity without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Unlock the identity and cache the session key
    Unlock,
    /// Revoke the session key and clear the cache
    Lock,
    /// Delete the sealed identity from this device
    Logout {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show your own public key and fingerprint
    Fingerprint {
        /// Also draw the randomart box
        #[arg(long)]
        randomart: bool,
    },
    /// Show identity and vault state
    Status,
    /// Manage pinned peer identities
    #[command(subcommand)]
    Trust(TrustAction),
    /// Encrypt a message for a peer and print the outbound JSON
    Seal {
        /// Recipient user ID
        peer: String,
        /// Recipient public key (base64)
        #[arg(long)]
        key: String,
        /// Message text, or "-" for stdin
        text: String,
    },
    /// Decrypt a pushed message JSON
    Open {
        /// Message or event JSON, or "-" for stdin
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = load_config(cli.config.as_deref())?;
    let mut config = loaded.config;
    if let Some(path) = cli.database {
        config.storage.database_path = Some(path);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_from_config(&config.logging);
    debug!(version = env!("CARGO_PKG_VERSION"), "Starting cipherline CLI");
    for warning in &loaded.warnings {
        warn!("{warning}");
    }

    let source = if cli.password_stdin {
        PasswordSource::Stdin
    } else {
        PasswordSource::Terminal
    };

    let ctx = Context::open(cli.user, config).await?;
    let mut out = io::stdout().lock();
    run(&ctx, cli.command, source, &mut out).await?;
    out.flush()?;
    Ok(())
}

async fn run(
    ctx: &Context,
    command: Command,
    source: PasswordSource,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::Signup { yes } => {
            identity_cmd::ensure_can_replace(ctx, |question| {
                prompt::confirm_replace(question, yes, source)
            })
            .await?;
            let password = prompt::new_password(source)?;
            identity_cmd::signup(ctx, &password, out).await
        }
        Command::Unlock => {
            let password = prompt::password(source)?;
            identity_cmd::unlock(ctx, &password, out).await
        }
        Command::Lock => identity_cmd::lock(ctx, out).await,
        Command::Logout { yes } => {
            if !prompt::confirm(
                "Delete the sealed identity from this device? This cannot be undone",
                yes,
            )? {
                anyhow::bail!("Aborted");
            }
            identity_cmd::logout(ctx, out).await
        }
        Command::Fingerprint { randomart } => {
            identity_cmd::show_fingerprint(ctx, randomart, out).await
        }
        Command::Status => identity_cmd::status(ctx, out).await,
        Command::Trust(action) => match action {
            TrustAction::Pin {
                peer,
                key,
                expect,
                yes,
            } => {
                trust_cmd::pin(
                    ctx,
                    &peer,
                    &key,
                    expect.as_deref(),
                    |question| prompt::confirm(question, yes),
                    out,
                )
                .await
            }
            TrustAction::Status { peer, key } => trust_cmd::status(ctx, &peer, &key, out).await,
            TrustAction::History { peer } => trust_cmd::history(ctx, &peer, out).await,
        },
        Command::Seal { peer, key, text } => {
            let text = message_cmd::read_arg(&text)?;
            message_cmd::seal(ctx, &peer, &key, &text, out).await
        }
        Command::Open { message } => {
            let json = message_cmd::read_arg(&message)?;
            message_cmd::open(ctx, &json, out).await
        }
    }
}
