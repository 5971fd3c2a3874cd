//! Configuration resolution for Cipherline.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (explicit path, or `<config dir>/cipherline/settings.json`)
//! 3. Environment variables
//! 4. CLI arguments (applied by the binary, highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory name used under the platform config/data/runtime dirs.
const APP_DIR: &str = "cipherline";

/// PBKDF2 rounds for new key packages unless configured otherwise.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Complete Cipherline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the unlocked session key may be mirrored between process runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionCacheMode {
    /// Never mirror the key; every start requires the password.
    Disabled,
    /// Keep the mirror in process memory only.
    Memory,
    /// Mirror into the per-login runtime directory (tmpfs on most systems).
    #[default]
    RuntimeDir,
}

impl Config {
    /// Settings that are accepted but weaker than the defaults.
    pub fn check(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.vault.kdf_iterations < DEFAULT_KDF_ITERATIONS {
            warnings.push(format!(
                "vault.kdf_iterations = {} is below the recommended {DEFAULT_KDF_ITERATIONS}; \
                 new identities will be easier to brute-force",
                self.vault.kdf_iterations
            ));
        }
        warnings
    }
}

/// A resolved configuration and the problems met while resolving it.
///
/// Configuration is read before the tracing subscriber exists, so warnings
/// are handed back for the caller to log once it does.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub warnings: Vec<String>,
}

impl std::str::FromStr for SessionCacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            "memory" => Ok(Self::Memory),
            "runtime_dir" | "runtime-dir" => Ok(Self::RuntimeDir),
            other => Err(Error::Config(format!("Unknown session cache mode: {other}"))),
        }
    }
}

/// Key vault configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VaultConfig {
    /// PBKDF2 rounds for newly sealed key packages.
    pub kdf_iterations: u32,
    pub session_cache: SessionCacheMode,
    /// Override for the session cache directory.
    pub runtime_dir: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            session_cache: SessionCacheMode::default(),
            runtime_dir: None,
        }
    }
}

/// The session cache that will actually be used on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSessionCache {
    Disabled,
    Memory,
    RuntimeDir(PathBuf),
}

impl VaultConfig {
    /// Directory holding session cache files, if the platform has a
    /// per-login runtime dir or one is configured.
    ///
    /// Never falls back to a temp or data dir: those are durable.
    pub fn resolved_runtime_dir(&self) -> Option<PathBuf> {
        self.runtime_dir_from(dirs::runtime_dir())
    }

    /// Resolve `session_cache` against the platform runtime dir.
    ///
    /// `runtime_dir` mode without a runtime dir degrades to `Memory`.
    pub fn resolved_session_cache(&self) -> ResolvedSessionCache {
        self.session_cache_from(dirs::runtime_dir())
    }

    fn runtime_dir_from(&self, system: Option<PathBuf>) -> Option<PathBuf> {
        self.runtime_dir
            .clone()
            .or_else(|| system.map(|dir| dir.join(APP_DIR)))
    }

    fn session_cache_from(&self, system: Option<PathBuf>) -> ResolvedSessionCache {
        match self.session_cache {
            SessionCacheMode::Disabled => ResolvedSessionCache::Disabled,
            SessionCacheMode::Memory => ResolvedSessionCache::Memory,
            SessionCacheMode::RuntimeDir => match self.runtime_dir_from(system) {
                Some(dir) => ResolvedSessionCache::RuntimeDir(dir),
                None => {
                    tracing::warn!(
                        "No runtime directory available; session key cached in memory only"
                    );
                    ResolvedSessionCache::Memory
                }
            },
        }
    }
}

/// Local storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved path of the local `SQLite` database.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR).join("cipherline.db")))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit_path` replaces the global config file; it must exist.
pub fn load_config(explicit_path: Option<&Path>) -> Result<LoadedConfig> {
    let mut config = match explicit_path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(path) if path.exists() => load_config_file(&path)?,
            _ => Config::default(),
        },
    };

    let mut warnings = apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    warnings.extend(config.check());

    Ok(LoadedConfig { config, warnings })
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR).join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `CIPHERLINE_*` overrides using `lookup` to read variables.
///
/// Unparseable values are skipped and reported in the returned warnings.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut warnings = Vec::new();
    if let Some(val) = lookup("CIPHERLINE_KDF_ITERATIONS") {
        match val.parse() {
            Ok(n) => config.vault.kdf_iterations = n,
            Err(_) => warnings.push(format!("Ignoring invalid CIPHERLINE_KDF_ITERATIONS={val}")),
        }
    }
    if let Some(val) = lookup("CIPHERLINE_SESSION_CACHE") {
        match val.parse() {
            Ok(mode) => config.vault.session_cache = mode,
            Err(_) => warnings.push(format!("Ignoring invalid CIPHERLINE_SESSION_CACHE={val}")),
        }
    }
    if let Some(val) = lookup("CIPHERLINE_DATABASE_PATH") {
        config.storage.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("CIPHERLINE_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = lookup("CIPHERLINE_LOG_JSON") {
        config.logging.json = matches!(val.as_str(), "1" | "true" | "yes");
    }
    warnings
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_uses_100k_rounds() {
        let config = Config::default();
        assert_eq!(config.vault.kdf_iterations, 100_000);
        assert_eq!(config.vault.session_cache, SessionCacheMode::RuntimeDir);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_file_keeps_section_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"vault":{"session_cache":"memory"}}"#).unwrap();
        assert_eq!(config.vault.session_cache, SessionCacheMode::Memory);
        assert_eq!(config.vault.kdf_iterations, 100_000);
        assert!(!config.logging.json);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        let warnings = apply_env_overrides(
            &mut config,
            env(&[
                ("CIPHERLINE_KDF_ITERATIONS", "250000"),
                ("CIPHERLINE_SESSION_CACHE", "off"),
                ("CIPHERLINE_DATABASE_PATH", "/tmp/x.db"),
                ("CIPHERLINE_LOG_LEVEL", "debug"),
                ("CIPHERLINE_LOG_JSON", "true"),
            ]),
        );
        assert_eq!(config.vault.kdf_iterations, 250_000);
        assert_eq!(config.vault.session_cache, SessionCacheMode::Disabled);
        assert_eq!(
            config.storage.database_path,
            Some(PathBuf::from("/tmp/x.db"))
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(warnings.is_empty());
        assert!(config.check().is_empty());
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = Config::default();
        let warnings = apply_env_overrides(
            &mut config,
            env(&[
                ("CIPHERLINE_KDF_ITERATIONS", "lots"),
                ("CIPHERLINE_SESSION_CACHE", "disk"),
            ]),
        );
        assert_eq!(config, Config::default());
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("CIPHERLINE_KDF_ITERATIONS=lots"));
        assert!(warnings[1].contains("CIPHERLINE_SESSION_CACHE=disk"));
    }

    #[test]
    fn weak_kdf_rounds_are_flagged() {
        let mut config = Config::default();
        let warnings = apply_env_overrides(
            &mut config,
            env(&[("CIPHERLINE_KDF_ITERATIONS", "1000")]),
        );
        assert!(warnings.is_empty());
        assert_eq!(config.vault.kdf_iterations, 1_000);

        let checks = config.check();
        assert_eq!(checks.len(), 1);
        assert!(checks[0].contains("below the recommended 100000"));
    }

    #[test]
    fn explicit_file_warnings_are_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"vault":{"kdf_iterations":5000}}"#).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.config.vault.kdf_iterations, 5_000);
        assert!(
            loaded
                .warnings
                .iter()
                .any(|w| w.contains("kdf_iterations = 5000"))
        );
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"logging":{"level":"warn","json":true}}"#).unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.json")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn runtime_dir_override_wins() {
        let vault = VaultConfig {
            runtime_dir: Some(PathBuf::from("/run/user/1000/custom")),
            ..VaultConfig::default()
        };
        assert_eq!(
            vault.resolved_runtime_dir(),
            Some(PathBuf::from("/run/user/1000/custom"))
        );
        assert_eq!(
            vault.session_cache_from(None),
            ResolvedSessionCache::RuntimeDir(PathBuf::from("/run/user/1000/custom"))
        );
    }

    #[test]
    fn missing_runtime_dir_never_resolves_to_disk() {
        let vault = VaultConfig::default();
        assert_eq!(vault.runtime_dir_from(None), None);
        assert_eq!(vault.session_cache_from(None), ResolvedSessionCache::Memory);
    }

    #[test]
    fn platform_runtime_dir_gets_app_subdir() {
        let vault = VaultConfig::default();
        assert_eq!(
            vault.session_cache_from(Some(PathBuf::from("/run/user/1000"))),
            ResolvedSessionCache::RuntimeDir(PathBuf::from("/run/user/1000/cipherline"))
        );
    }

    #[test]
    fn explicit_modes_ignore_runtime_dir() {
        let disabled = VaultConfig {
            session_cache: SessionCacheMode::Disabled,
            ..VaultConfig::default()
        };
        assert_eq!(
            disabled.session_cache_from(Some(PathBuf::from("/run/user/1000"))),
            ResolvedSessionCache::Disabled
        );
        let memory = VaultConfig {
            session_cache: SessionCacheMode::Memory,
            ..VaultConfig::default()
        };
        assert_eq!(memory.session_cache_from(None), ResolvedSessionCache::Memory);
    }

    #[test]
    fn session_cache_mode_parses_aliases() {
        assert_eq!(
            "runtime-dir".parse::<SessionCacheMode>().unwrap(),
            SessionCacheMode::RuntimeDir
        );
        assert_eq!(
            "MEMORY".parse::<SessionCacheMode>().unwrap(),
            SessionCacheMode::Memory
        );
        assert!("disk".parse::<SessionCacheMode>().is_err());
    }
}
