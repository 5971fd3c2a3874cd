//! Session-scoped caches for the unlocked key.
//!
//! A cache lets a restarted client within the same login session skip the
//! password prompt. Neither implementation writes to durable storage.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use zeroize::Zeroizing;

use super::VaultError;

/// Where an exported session key is mirrored.
pub trait SessionCache: Send + Sync {
    fn store(&self, user_id: &str, encoded_secret: &str) -> Result<(), VaultError>;

    fn load(&self, user_id: &str) -> Result<Option<Zeroizing<String>>, VaultError>;

    /// Remove the entry. Missing entries are not an error.
    fn clear(&self, user_id: &str) -> Result<(), VaultError>;
}

/// Process-lifetime cache.
#[derive(Default)]
pub struct MemorySessionCache {
    entries: Mutex<HashMap<String, Zeroizing<String>>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionCache for MemorySessionCache {
    fn store(&self, user_id: &str, encoded_secret: &str) -> Result<(), VaultError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.to_string(), Zeroizing::new(encoded_secret.to_string()));
        Ok(())
    }

    fn load(&self, user_id: &str) -> Result<Option<Zeroizing<String>>, VaultError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned())
    }

    fn clear(&self, user_id: &str) -> Result<(), VaultError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id);
        Ok(())
    }
}

/// Cache files in the per-login runtime directory.
///
/// `$XDG_RUNTIME_DIR` is a tmpfs owned by the user and removed when the last
/// login session ends. Files are owner-only (0600) inside an owner-only
/// directory (0700).
pub struct RuntimeDirCache {
    dir: PathBuf,
}

impl RuntimeDirCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, user_id: &str) -> PathBuf {
        // Hex keeps arbitrary user ids out of path syntax.
        self.dir
            .join(format!("session-{}.key", hex::encode(user_id.as_bytes())))
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }
}

fn cache_error(context: &str, path: &Path, e: &std::io::Error) -> VaultError {
    VaultError::Cache(format!("{context} {}: {e}", path.display()))
}

impl SessionCache for RuntimeDirCache {
    fn store(&self, user_id: &str, encoded_secret: &str) -> Result<(), VaultError> {
        self.ensure_dir()
            .map_err(|e| cache_error("Failed to create", &self.dir, &e))?;
        let path = self.entry_path(user_id);

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&path)
            .map_err(|e| cache_error("Failed to open", &path, &e))?;
        file.write_all(encoded_secret.as_bytes())
            .map_err(|e| cache_error("Failed to write", &path, &e))?;

        // `mode` only applies on creation; tighten a pre-existing file too.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| cache_error("Failed to restrict", &path, &e))?;
        }
        Ok(())
    }

    fn load(&self, user_id: &str) -> Result<Option<Zeroizing<String>>, VaultError> {
        let path = self.entry_path(user_id);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            match std::fs::metadata(&path) {
                Ok(metadata) => {
                    let mode = metadata.permissions().mode() & 0o777;
                    if mode != 0o600 {
                        return Err(VaultError::Cache(format!(
                            "Session cache {} has insecure permissions: {mode:o} (expected 600)",
                            path.display()
                        )));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(cache_error("Failed to stat", &path, &e)),
            }
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(Zeroizing::new(content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(cache_error("Failed to read", &path, &e)),
        }
    }

    fn clear(&self, user_id: &str) -> Result<(), VaultError> {
        let path = self.entry_path(user_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(cache_error("Failed to remove", &path, &e)),
        }
    }
}
