// ⚙️ Configuration - TOML file, then environment overrides
//
//   database_path    = "racing_registry.db"
//   reconcile_policy = "automatic"          # or "on-demand"
//   default_actor    = "system"
//   server_addr      = "0.0.0.0:3000"

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const ENV_DATABASE: &str = "RACING_REGISTRY_DB";
pub const ENV_POLICY: &str = "RACING_REGISTRY_POLICY";
pub const ENV_ACTOR: &str = "RACING_REGISTRY_ACTOR";
pub const ENV_ADDR: &str = "RACING_REGISTRY_ADDR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {message}")]
    Env { var: &'static str, message: String },
}

// ============================================================================
// RECONCILE POLICY
// ============================================================================

/// When derived state (counters, grade, titles) is brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcilePolicy {
    /// Every meet-result mutation and dog edit refreshes the dog in the same transaction
    #[default]
    Automatic,
    /// Only explicit refresh/reconcile calls touch derived state
    OnDemand,
}

impl ReconcilePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilePolicy::Automatic => "automatic",
            ReconcilePolicy::OnDemand => "on-demand",
        }
    }

    pub fn is_automatic(&self) -> bool {
        *self == ReconcilePolicy::Automatic
    }
}

impl fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconcilePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(ReconcilePolicy::Automatic),
            "on-demand" | "ondemand" | "manual" => Ok(ReconcilePolicy::OnDemand),
            other => Err(format!(
                "expected 'automatic' or 'on-demand', got {:?}",
                other
            )),
        }
    }
}

// ============================================================================
// REGISTRY CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub database_path: PathBuf,
    pub reconcile_policy: ReconcilePolicy,
    /// Actor recorded when a caller does not name one (CLI only)
    pub default_actor: String,
    pub server_addr: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            database_path: PathBuf::from("racing_registry.db"),
            reconcile_policy: ReconcilePolicy::Automatic,
            default_actor: "system".to_string(),
            server_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl RegistryConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// File (if given) then process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Override fields from whatever `lookup` returns for each variable.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(db) = present(ENV_DATABASE) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(policy) = present(ENV_POLICY) {
            self.reconcile_policy = policy.parse().map_err(|message| ConfigError::Env {
                var: ENV_POLICY,
                message,
            })?;
        }
        if let Some(actor) = present(ENV_ACTOR) {
            self.default_actor = actor;
        }
        if let Some(addr) = present(ENV_ADDR) {
            self.server_addr = addr;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.database_path, PathBuf::from("racing_registry.db"));
        assert_eq!(config.reconcile_policy, ReconcilePolicy::Automatic);
        assert_eq!(config.default_actor, "system");
        assert_eq!(config.server_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RegistryConfig::from_toml_str(
            r#"
            reconcile_policy = "on-demand"
            default_actor = "race-secretary"
            "#,
        )
        .unwrap();

        assert_eq!(config.reconcile_policy, ReconcilePolicy::OnDemand);
        assert_eq!(config.default_actor, "race-secretary");
        assert_eq!(config.server_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_bad_policy_in_file() {
        assert!(RegistryConfig::from_toml_str(r#"reconcile_policy = "sometimes""#).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database_path = \"/srv/registry.db\"").unwrap();

        let mut config = RegistryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/srv/registry.db"));

        let env: HashMap<&str, &str> = [
            (ENV_DATABASE, "/tmp/override.db"),
            (ENV_POLICY, "on-demand"),
            (ENV_ACTOR, ""),
        ]
        .into_iter()
        .collect();

        config
            .apply_env(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.reconcile_policy, ReconcilePolicy::OnDemand);
        // Blank values are ignored
        assert_eq!(config.default_actor, "system");
    }

    #[test]
    fn test_bad_policy_in_env() {
        let mut config = RegistryConfig::default();
        let err = config
            .apply_env(|var| (var == ENV_POLICY).then(|| "whenever".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_POLICY));
    }

    #[test]
    fn test_missing_file() {
        let err = RegistryConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
