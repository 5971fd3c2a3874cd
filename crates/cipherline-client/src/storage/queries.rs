//! Database queries for the Cipherline client.

use cipherline_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{LockedKeyPackage, PinnedIdentity};

/// Fields of a package about to be written.
pub struct NewLockedKey<'a> {
    pub user_id: &'a str,
    pub public_key: &'a [u8],
    pub ciphertext: &'a [u8],
    pub salt: &'a [u8],
    pub iv: &'a [u8],
    pub kdf_iterations: u32,
}

impl Database {
    // =========================================================================
    // Locked key packages
    // =========================================================================

    /// Insert a package, replacing any existing one for the same user.
    pub async fn upsert_locked_key(&self, key: &NewLockedKey<'_>) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            r"
            INSERT INTO locked_keys
                (user_id, public_key, ciphertext, salt, iv, kdf_iterations, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                public_key = excluded.public_key,
                ciphertext = excluded.ciphertext,
                salt = excluded.salt,
                iv = excluded.iv,
                kdf_iterations = excluded.kdf_iterations,
                created_at = excluded.created_at
            ",
        )
        .bind(key.user_id)
        .bind(key.public_key)
        .bind(key.ciphertext)
        .bind(key.salt)
        .bind(key.iv)
        .bind(i64::from(key.kdf_iterations))
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Get the package for a user, if one exists.
    pub async fn get_locked_key(
        &self,
        user_id: &str,
    ) -> Result<Option<LockedKeyPackage>, DatabaseError> {
        let row = sqlx::query_as::<_, LockedKeyPackage>(
            "SELECT * FROM locked_keys WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Delete a user's package. Returns whether a row was removed.
    pub async fn delete_locked_key(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM locked_keys WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Pinned identities
    // =========================================================================

    /// Get the active pin for a pair.
    pub async fn active_pin(
        &self,
        owner_id: &str,
        peer_id: &str,
    ) -> Result<Option<PinnedIdentity>, DatabaseError> {
        let pin = sqlx::query_as::<_, PinnedIdentity>(
            "SELECT * FROM pinned_identities WHERE owner_id = ? AND peer_id = ? AND superseded_at IS NULL",
        )
        .bind(owner_id)
        .bind(peer_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(pin)
    }

    /// Supersede the active pin (if any) and insert a new one, atomically.
    pub async fn replace_pin(
        &self,
        owner_id: &str,
        peer_id: &str,
        fingerprint: &str,
        public_key: &str,
    ) -> Result<PinnedIdentity, DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE pinned_identities SET superseded_at = ? WHERE owner_id = ? AND peer_id = ? AND superseded_at IS NULL",
        )
        .bind(now)
        .bind(owner_id)
        .bind(peer_id)
        .execute(&mut *tx)
        .await?;

        let pin = sqlx::query_as::<_, PinnedIdentity>(
            r"
            INSERT INTO pinned_identities (owner_id, peer_id, fingerprint, public_key, pinned_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            ",
        )
        .bind(owner_id)
        .bind(peer_id)
        .bind(fingerprint)
        .bind(public_key)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(pin)
    }

    /// Every pin ever recorded for a pair, oldest first.
    pub async fn pin_history(
        &self,
        owner_id: &str,
        peer_id: &str,
    ) -> Result<Vec<PinnedIdentity>, DatabaseError> {
        let pins = sqlx::query_as::<_, PinnedIdentity>(
            "SELECT * FROM pinned_identities WHERE owner_id = ? AND peer_id = ? ORDER BY id ASC",
        )
        .bind(owner_id)
        .bind(peer_id)
        .fetch_all(self.pool())
        .await?;

        Ok(pins)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn package<'a>(user_id: &'a str, ciphertext: &'a [u8]) -> NewLockedKey<'a> {
        NewLockedKey {
            user_id,
            public_key: &[1; 32],
            ciphertext,
            salt: &[2; 16],
            iv: &[3; 12],
            kdf_iterations: 1_000,
        }
    }

    #[tokio::test]
    async fn locked_key_upsert_overwrites() {
        let db = Database::open_in_memory().await.unwrap();
        db.upsert_locked_key(&package("alice", b"first")).await.unwrap();
        db.upsert_locked_key(&package("alice", b"second")).await.unwrap();

        let row = db.get_locked_key("alice").await.unwrap().unwrap();
        assert_eq!(row.ciphertext, b"second");
        assert_eq!(row.kdf_iterations, 1_000);
        assert_eq!(row.salt, vec![2; 16]);
    }

    #[tokio::test]
    async fn locked_key_missing_is_none() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(db.get_locked_key("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_locked_key_reports_removal() {
        let db = Database::open_in_memory().await.unwrap();
        db.upsert_locked_key(&package("alice", b"ct")).await.unwrap();
        assert!(db.delete_locked_key("alice").await.unwrap());
        assert!(!db.delete_locked_key("alice").await.unwrap());
        assert!(db.get_locked_key("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_pin_supersedes_previous() {
        let db = Database::open_in_memory().await.unwrap();
        let first = db.replace_pin("alice", "bob", "fp1", "k1").await.unwrap();
        let second = db.replace_pin("alice", "bob", "fp2", "k2").await.unwrap();

        let active = db.active_pin("alice", "bob").await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        assert_eq!(active.fingerprint, "fp2");

        let history = db.pin_history("alice", "bob").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert!(!history[0].is_active());
        assert!(history[1].is_active());
    }

    #[tokio::test]
    async fn pins_are_scoped_per_owner() {
        let db = Database::open_in_memory().await.unwrap();
        db.replace_pin("alice", "bob", "fp-a", "k").await.unwrap();
        db.replace_pin("carol", "bob", "fp-c", "k").await.unwrap();

        let alice = db.active_pin("alice", "bob").await.unwrap().unwrap();
        let carol = db.active_pin("carol", "bob").await.unwrap().unwrap();
        assert_eq!(alice.fingerprint, "fp-a");
        assert_eq!(carol.fingerprint, "fp-c");
        assert!(db.active_pin("bob", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_active_pin_is_rejected_by_index() {
        let db = Database::open_in_memory().await.unwrap();
        db.replace_pin("alice", "bob", "fp1", "k1").await.unwrap();

        let result = sqlx::query(
            "INSERT INTO pinned_identities (owner_id, peer_id, fingerprint, public_key, pinned_at) VALUES ('alice', 'bob', 'x', 'y', 0)",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }
}
