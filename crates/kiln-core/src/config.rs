//! Engine configuration loader.
//!
//! Reads configuration from `kiln.yaml` (project-local or global).
//!
//! Search order:
//!   1. An explicit path handed in by the caller
//!   2. `./kiln.yaml` (current directory)
//!   3. `~/.kiln/config.yaml` (global)
//!   4. Built-in defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Engine-level configuration, as opposed to the per-recipe `config` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory for per-run working directories.
    pub run_dir: PathBuf,

    /// Directory where finished artifacts should be collected.
    pub output_dir: PathBuf,

    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,

    /// Location of the SQLite run store.
    pub db_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from("~/kiln-workspace/runs"),
            output_dir: PathBuf::from("~/kiln-workspace/output"),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: PathBuf::from("~/.kiln/runs.db"),
        }
    }
}

impl EngineConfig {
    /// Load configuration, falling back to defaults when no file is found.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = explicit_path {
            candidates.push(path.to_path_buf());
        }
        candidates.push(PathBuf::from("kiln.yaml"));
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".kiln").join("config.yaml"));
        }

        let mut config = Self::default();
        for path in candidates {
            if path.exists() {
                let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
                break;
            }
        }

        config.expand_paths();
        Ok(config)
    }

    fn expand_paths(&mut self) {
        self.run_dir = expand_tilde(&self.run_dir);
        self.output_dir = expand_tilde(&self.output_dir);
        self.persistence.db_path = expand_tilde(&self.persistence.db_path);
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(stripped) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(stripped),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config_file() {
        let config = EngineConfig::default();
        assert!(config.persistence.enabled);
        assert!(config.run_dir.ends_with("runs"));
    }

    #[test]
    fn partial_config_keeps_field_defaults() {
        let config: EngineConfig =
            serde_yaml::from_str("run_dir: /tmp/kiln-runs").expect("valid yaml");
        assert_eq!(config.run_dir, PathBuf::from("/tmp/kiln-runs"));
        assert!(config.persistence.enabled);
    }

    #[test]
    fn tilde_expansion_leaves_absolute_paths_alone() {
        let path = PathBuf::from("/var/lib/kiln");
        assert_eq!(expand_tilde(&path), path);
    }
}
