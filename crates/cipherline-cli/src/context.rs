//! State shared by every subcommand of one invocation.

use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};

use cipherline_client::storage::Database;
use cipherline_client::{KeyVault, SessionKey, TrustStore};
use cipherline_core::Config;
use cipherline_core::config::ResolvedSessionCache;

pub struct Context {
    pub user_id: String,
    pub config: Config,
    /// The cache the vault actually uses on this machine.
    pub session_cache: ResolvedSessionCache,
    pub db: Database,
    pub vault: Arc<KeyVault>,
    pub trust: TrustStore,
}

impl Context {
    /// Open the configured database for `user_id`.
    pub async fn open(user_id: impl Into<String>, config: Config) -> Result<Self> {
        let path = config
            .storage
            .resolved_database_path()
            .context("Cannot determine a data directory; pass --database")?;
        let db = Database::open(&path)
            .await
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Ok(Self::with_database(user_id, config, db))
    }

    pub fn with_database(user_id: impl Into<String>, config: Config, db: Database) -> Self {
        let session_cache = config.vault.resolved_session_cache();
        let vault = Arc::new(KeyVault::with_resolved_cache(
            db.clone(),
            config.vault.kdf_iterations,
            session_cache.clone(),
        ));
        let trust = TrustStore::new(db.clone());
        Self {
            user_id: user_id.into(),
            config,
            session_cache,
            db,
            vault,
            trust,
        }
    }

    /// The cached session key, or an error telling the user to unlock.
    pub async fn session_key(&self) -> Result<Arc<SessionKey>> {
        self.vault
            .recover_session_key(&self.user_id)
            .await?
            .ok_or_else(|| anyhow!("Vault is locked; run `cipherline unlock` first"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use cipherline_core::config::SessionCacheMode;
    use cipherline_crypto::MIN_KDF_ITERATIONS;

    /// A context backed by an in-memory database and session cache.
    pub(crate) async fn memory_context(user_id: &str) -> Context {
        let mut config = Config::default();
        config.vault.kdf_iterations = MIN_KDF_ITERATIONS;
        config.vault.session_cache = SessionCacheMode::Memory;
        let db = Database::open_in_memory().await.unwrap();
        Context::with_database(user_id, config, db)
    }

    #[tokio::test]
    async fn session_key_requires_unlock() {
        let ctx = memory_context("alice").await;
        assert_eq!(ctx.session_cache, ResolvedSessionCache::Memory);
        let err = ctx.session_key().await.unwrap_err();
        assert!(err.to_string().contains("cipherline unlock"));

        ctx.vault.generate_identity("alice", "pw").await.unwrap();
        ctx.vault.unlock("alice", "pw").await.unwrap();
        assert_eq!(ctx.session_key().await.unwrap().user_id(), "alice");
    }
}
