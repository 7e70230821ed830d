//! # pontoon-config
//!
//! Configuration management for the Pontoon runtime.
//!
//! Loads configuration from:
//! 1. `~/.pontoon/config.toml` (global)
//! 2. `.pontoon/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

pub mod logging;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap()
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap() = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub vfs: VfsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            vfs: VfsConfig::default(),
        }
    }
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.pontoon/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        // 2. Load project config (.pontoon/config.toml) - overrides global
        let project_path = Path::new(".pontoon/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(project_path)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a config from a TOML string, with env overrides applied.
    /// Used by tests and embedders that manage their own files.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Global config path: ~/.pontoon/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".pontoon/config.toml"))
    }

    /// Merge another config (project overrides)
    fn merge(&mut self, other: Config) {
        if other.bridge.pseudo_stack_kib != BridgeConfig::default().pseudo_stack_kib {
            self.bridge.pseudo_stack_kib = other.bridge.pseudo_stack_kib;
        }
        if other.vfs.root_mount != VfsConfig::default().root_mount {
            self.vfs.root_mount = other.vfs.root_mount;
        }
        if !other.vfs.mounts.is_empty() {
            self.vfs.mounts = other.vfs.mounts;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(kib) = std::env::var("PONTOON_PSEUDO_STACK_KIB") {
            if let Ok(n) = kib.parse() {
                self.bridge.pseudo_stack_kib = n;
            }
        }
        if let Ok(kind) = std::env::var("PONTOON_ROOT_MOUNT") {
            self.vfs.root_mount = kind;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap()
    }
}

/// Main-thread bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Stack size in KiB for the cooperative pseudo-thread
    pub pseudo_stack_kib: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            // 640K of stack should be enough for anyone.
            pseudo_stack_kib: 640,
        }
    }
}

/// Virtual filesystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Backing store kind for the mandatory root mount
    pub root_mount: String,
    /// Additional mounts attached at startup
    pub mounts: Vec<MountDecl>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            root_mount: "mem".to_string(),
            mounts: Vec::new(),
        }
    }
}

/// Declarative mount-table entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountDecl {
    /// Absolute mount point, e.g. "/tmp"
    pub point: String,
    /// Backing store kind, e.g. "mem"
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bridge.pseudo_stack_kib, 640);
        assert_eq!(config.vfs.root_mount, "mem");
        assert!(config.vfs.mounts.is_empty());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[bridge]"));
        assert!(toml_str.contains("[vfs]"));
        assert!(toml_str.contains("pseudo_stack_kib"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.bridge.pseudo_stack_kib, parsed.bridge.pseudo_stack_kib);
        assert_eq!(config.vfs.root_mount, parsed.vfs.root_mount);
    }

    #[test]
    fn test_mount_decls_parse() {
        let config = Config::from_toml(
            r#"
            [vfs]
            root_mount = "mem"

            [[vfs.mounts]]
            point = "/tmp"
            kind = "mem"

            [[vfs.mounts]]
            point = "/home/user"
            kind = "mem"
            "#,
        )
        .unwrap();
        assert_eq!(config.vfs.mounts.len(), 2);
        assert_eq!(config.vfs.mounts[0].point, "/tmp");
        assert_eq!(config.vfs.mounts[1].kind, "mem");
    }

    #[test]
    fn test_project_merge_overrides_stack() {
        let mut base = Config::default();
        let project = Config::from_toml("[bridge]\npseudo_stack_kib = 256\n").unwrap();
        base.merge(project);
        assert_eq!(base.bridge.pseudo_stack_kib, 256);
    }

    #[test]
    fn test_config_snapshot_serializes() {
        // Embedders export snapshots as JSON for diagnostics.
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("pseudo_stack_kib"));
    }

    #[test]
    fn test_config_file_roundtrip() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(Config::default_toml().as_bytes()).unwrap();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        let parsed = Config::from_toml(&contents).unwrap();
        assert_eq!(
            parsed.bridge.pseudo_stack_kib,
            Config::default().bridge.pseudo_stack_kib
        );
    }

    #[test]
    fn test_env_override_wins() {
        std::env::set_var("PONTOON_ROOT_MOUNT", "custom");
        let config = Config::from_toml("[vfs]\nroot_mount = \"mem\"\n").unwrap();
        std::env::remove_var("PONTOON_ROOT_MOUNT");
        assert_eq!(config.vfs.root_mount, "custom");
    }
}
