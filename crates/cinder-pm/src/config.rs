//! The configuration object consumed by the engine.
//!
//! Loading from files, flags or the environment is the embedding
//! application's concern; this module only defines the shape, the
//! defaults and the accessors that turn settings into live components.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::database::{new_database, DatabaseEngine, PackageDatabase};
use crate::error::{CinderError, Result};
use crate::solver::{ResolverOptions, SolverKind, SolverOptions};

/// The name of the installed database file under
/// `system.database_path` when the persistent engine is selected.
pub const SYSTEM_DATABASE_FILE: &str = "cinder.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub solver: SolverConfig,

    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_rootfs")]
    pub rootfs: PathBuf,

    /// `memory` or `embedded-kv`.
    #[serde(default = "default_database_engine")]
    pub database_engine: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/cache/cinder")
}

fn default_rootfs() -> PathBuf {
    PathBuf::from("/")
}

fn default_database_engine() -> String {
    "memory".to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            database_path: default_database_path(),
            rootfs: default_rootfs(),
            database_engine: default_database_engine(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Worker-pool width; 0 means the host logical CPU count.
    #[serde(default)]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// `single-core` or `parallel`.
    #[serde(default, rename = "type")]
    pub kind: String,

    #[serde(default = "default_rate")]
    pub rate: f32,

    #[serde(default = "default_discount")]
    pub discount: f32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_rate() -> f32 {
    0.7
}

fn default_discount() -> f32 {
    1.0
}

fn default_max_attempts() -> usize {
    9000
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            kind: String::new(),
            rate: default_rate(),
            discount: default_discount(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,

    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_enable")]
    pub enable: bool,

    #[serde(default)]
    pub url: String,
}

fn default_enable() -> bool {
    true
}

impl Config {
    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Open the installed-system database selected by
    /// `system.database_engine`.
    pub fn system_db(&self) -> Result<Arc<dyn PackageDatabase>> {
        let engine = DatabaseEngine::from_str(&self.system.database_engine).ok_or_else(|| {
            CinderError::InvalidInput(format!(
                "unknown database engine {:?}",
                self.system.database_engine
            ))
        })?;
        let path = self.system.database_path.join(SYSTEM_DATABASE_FILE);
        new_database(engine, Some(&path))
    }

    pub fn concurrency(&self) -> usize {
        if self.general.concurrency > 0 {
            self.general.concurrency
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn solver_options(&self) -> Result<SolverOptions> {
        let kind = SolverKind::from_str(&self.solver.kind).ok_or_else(|| {
            CinderError::InvalidInput(format!("unknown solver type {:?}", self.solver.kind))
        })?;
        Ok(SolverOptions {
            kind,
            concurrency: self.concurrency(),
        })
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            rate: self.solver.rate,
            discount: self.solver.discount,
            max_attempts: self.solver.max_attempts,
        }
    }

    /// Enabled repositories, highest priority (lowest number) first.
    pub fn enabled_repositories(&self) -> Vec<&RepositoryConfig> {
        let mut enabled: Vec<&RepositoryConfig> =
            self.repositories.iter().filter(|r| r.enable).collect();
        enabled.sort_by_key(|r| r.priority);
        enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.system.database_engine, "memory");
        assert_eq!(config.solver.max_attempts, 9000);
        assert!(config.concurrency() >= 1);
        assert!(config.system_db().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let doc = r#"
system:
  database_path: /tmp/cinder
  rootfs: /sysroot
  database_engine: memory
general:
  concurrency: 4
solver:
  type: parallel
  rate: 0.5
repositories:
  - name: main
    priority: 1
    url: https://example.org/main
  - name: extras
    priority: 90
    enable: false
    url: https://example.org/extras
"#;
        let config = Config::from_yaml(doc).unwrap();
        assert_eq!(config.system.rootfs, PathBuf::from("/sysroot"));
        assert_eq!(config.concurrency(), 4);
        assert_eq!(
            config.solver_options().unwrap().kind,
            SolverKind::Parallel
        );
        assert_eq!(config.resolver_options().rate, 0.5);

        let enabled = config.enabled_repositories();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "main");
    }

    #[test]
    fn test_invalid_solver_type() {
        let mut config = Config::default();
        config.solver.kind = "qlearning".to_string();
        assert!(config.solver_options().is_err());
    }

    #[test]
    fn test_persistent_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.system.database_engine = "embedded-kv".to_string();
        config.system.database_path = dir.path().to_path_buf();
        assert!(config.system_db().is_ok());
    }
}
