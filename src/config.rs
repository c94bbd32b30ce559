use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{DotsmithError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    /// Module-scoped configuration subtrees, keyed by module name. Fed into
    /// `config_hash` and exposed to templates as `Module`.
    #[serde(default)]
    pub modules: BTreeMap<String, serde_yaml::Value>,
    /// Secret references by name, e.g. `github_token: op://vault/item/field`.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// The dotfiles repository root. Not read from YAML; filled in by `load`.
    #[serde(skip)]
    pub dotfiles_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub github_user: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Profile {
    pub description: Option<String>,
    #[serde(default)]
    pub modules: Vec<String>,
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".state")
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            user: UserConfig::default(),
            modules_dir: default_modules_dir(),
            state_dir: default_state_dir(),
            profiles: BTreeMap::new(),
            modules: BTreeMap::new(),
            secrets: BTreeMap::new(),
            dotfiles_dir: PathBuf::new(),
        }
    }
}

/// Recursively merge two YAML values. For mappings, overlay keys win;
/// missing keys are inherited from base. All other types (scalars, sequences)
/// are replaced wholesale by the overlay value.
fn merge_yaml(base: serde_yaml::Value, overlay: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                let merged = if let Some(base_v) = base_map.remove(&k) {
                    merge_yaml(base_v, v)
                } else {
                    v
                };
                base_map.insert(k, merged);
            }
            Value::Mapping(base_map)
        }
        // Scalars and sequences: overlay wins unconditionally
        (_, overlay) => overlay,
    }
}

fn load_yaml_file(path: &Path) -> Result<serde_yaml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DotsmithError::ConfigError(format!("failed to read {}: {}", path.display(), e))
    })?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Default dotfiles directory: `$DOTFILES_DIR`, else `~/.dotfiles`.
pub fn default_dotfiles_dir() -> PathBuf {
    std::env::var("DOTFILES_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/"))
                .join(".dotfiles")
        })
}

impl GlobalConfig {
    /// Load configuration with layered merging.
    ///
    /// When an explicit `path` is supplied (via `--config`), that single file
    /// is loaded as-is with no layering.
    ///
    /// Otherwise configs are merged in ascending priority order so the local
    /// override file only needs to specify the keys it wants to change:
    ///
    ///   1. `<dotfiles_dir>/config.yml`        (base)
    ///   2. `<dotfiles_dir>/config.local.yml`  (per-machine override)
    ///
    /// Any layer that does not exist is silently skipped. If no file is found
    /// at any location, built-in defaults are used.
    pub fn load(dotfiles_dir: &Path, path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(p) = path {
            if !p.exists() {
                return Err(DotsmithError::ConfigError(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            let val = load_yaml_file(p)?;
            GlobalConfig::deserialize(val)
                .map_err(|e| DotsmithError::ConfigError(e.to_string()))?
        } else {
            let layers = [
                dotfiles_dir.join("config.yml"),
                dotfiles_dir.join("config.local.yml"),
            ];

            let mut merged: Option<serde_yaml::Value> = None;
            for layer_path in &layers {
                if layer_path.exists() {
                    let val = load_yaml_file(layer_path)?;
                    merged = Some(match merged {
                        Some(base) => merge_yaml(base, val),
                        None => val,
                    });
                }
            }

            match merged {
                None => Self::default(),
                Some(val) => GlobalConfig::deserialize(val)
                    .map_err(|e| DotsmithError::ConfigError(e.to_string()))?,
            }
        };

        config.dotfiles_dir = dotfiles_dir.to_path_buf();
        Ok(config)
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.dotfiles_dir.join(&self.modules_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dotfiles_dir.join(&self.state_dir)
    }

    /// The configuration subtree for one module; Null when absent.
    pub fn module_config(&self, name: &str) -> serde_yaml::Value {
        self.modules
            .get(name)
            .cloned()
            .unwrap_or(serde_yaml::Value::Null)
    }

    pub fn profile(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| DotsmithError::ConfigError(format!("unknown profile: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GlobalConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.modules_dir, PathBuf::from("modules"));
        assert_eq!(config.state_dir, PathBuf::from(".state"));
        assert!(config.profiles.is_empty());
        assert_eq!(config.dotfiles_dir, dir.path());
    }

    #[test]
    fn test_layered_merge() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yml"),
            r#"
user:
  name: Alice
  email: alice@example.com
modules:
  git:
    signing: true
"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("config.local.yml"),
            r#"
user:
  email: alice@work.example.com
"#,
        )
        .unwrap();

        let config = GlobalConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.user.name, "Alice");
        assert_eq!(config.user.email, "alice@work.example.com");
        assert!(config.modules.contains_key("git"));
    }

    #[test]
    fn test_module_config_missing_is_null() {
        let dir = tempfile::tempdir().unwrap();
        let config = GlobalConfig::load(dir.path(), None).unwrap();
        assert!(config.module_config("nope").is_null());
    }

    #[test]
    fn test_profiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yml"),
            r#"
profiles:
  work:
    description: Work machine
    modules: [git, zsh]
"#,
        )
        .unwrap();

        let config = GlobalConfig::load(dir.path(), None).unwrap();
        let profile = config.profile("work").unwrap();
        assert_eq!(profile.modules, vec!["git", "zsh"]);
        assert!(config.profile("home").is_err());
    }
}
