use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::error::{DotsmithError, Result};

/// Declarative record for one module, parsed from `module.yml`.
/// Immutable after load.
#[derive(Debug, Deserialize, Clone)]
pub struct ModuleManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Lower = earlier among modules the plan leaves otherwise unordered.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// OS identifiers this module supports; empty = all.
    #[serde(default)]
    pub os: Vec<String>,
    /// Commands that must be on PATH before install.
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileSpec>,
    #[serde(default)]
    pub prompts: Vec<PromptSpec>,
    /// Post-install message surfaced in the run summary.
    #[serde(default)]
    pub notes: Option<String>,
    /// Directory the manifest was loaded from. Set by the loader.
    #[serde(skip)]
    pub dir: PathBuf,
}

fn default_priority() -> i32 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileSpec {
    /// Path relative to the module directory.
    pub source: PathBuf,
    /// Destination path; may contain `~`.
    pub dest: String,
    #[serde(rename = "type", default)]
    pub kind: FileKind,
    /// Octal permission bits, accepted as `0644` or `"0644"`.
    #[serde(default, deserialize_with = "deserialize_mode")]
    pub mode: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    #[default]
    Symlink,
    Copy,
    Template,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Symlink => write!(f, "symlink"),
            FileKind::Copy => write!(f, "copy"),
            FileKind::Template => write!(f, "template"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptSpec {
    pub key: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: PromptKind,
    #[serde(default)]
    pub default: Option<String>,
    /// Choices for `type: choice`.
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub show_when: ShowWhen,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    #[default]
    Input,
    Confirm,
    Choice,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShowWhen {
    /// Only when the module was named on the command line.
    #[default]
    ExplicitInstall,
    Always,
    Interactive,
}

/// Accept `mode: 420`, `mode: 0o644`-style integers, or `mode: "0644"`.
fn deserialize_mode<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u32),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) => u32::from_str_radix(s.trim_start_matches("0o"), 8)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid octal mode: {}", s))),
    }
}

impl ModuleManifest {
    pub fn from_str(content: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(content)
            .map_err(|e| DotsmithError::MalformedManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DotsmithError::MalformedManifest(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut manifest = Self::from_str(&content)?;
        manifest.dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        let name_re = regex::Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap();
        if !name_re.is_match(&self.name) {
            return Err(DotsmithError::ValidationError(format!(
                "invalid module name '{}': must match [a-z0-9][a-z0-9_-]*",
                self.name
            )));
        }
        if self.name.len() > 64 {
            return Err(DotsmithError::ValidationError(
                "module name must be at most 64 characters".to_string(),
            ));
        }

        if self.version.is_empty() {
            return Err(DotsmithError::ValidationError(
                "version must not be empty".to_string(),
            ));
        }

        for spec in &self.files {
            let expanded = shellexpand::tilde(&spec.dest);
            if !Path::new(expanded.as_ref()).is_absolute() {
                return Err(DotsmithError::ValidationError(format!(
                    "file dest must be absolute after ~ expansion: {}",
                    spec.dest
                )));
            }
            if spec.source.is_absolute() {
                return Err(DotsmithError::ValidationError(format!(
                    "file source must be relative to the module directory: {}",
                    spec.source.display()
                )));
            }
        }

        for prompt in &self.prompts {
            if prompt.key.is_empty() {
                return Err(DotsmithError::ValidationError(
                    "prompt key must not be empty".to_string(),
                ));
            }
            if prompt.kind == PromptKind::Choice {
                if prompt.options.is_empty() {
                    return Err(DotsmithError::ValidationError(format!(
                        "choice prompt '{}' needs options",
                        prompt.key
                    )));
                }
                if let Some(ref default) = prompt.default {
                    if !prompt.options.contains(default) {
                        return Err(DotsmithError::ValidationError(format!(
                            "choice prompt '{}': default '{}' is not one of the options",
                            prompt.key, default
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Absolute path of a FileSpec source inside this module.
    pub fn source_path(&self, spec: &FileSpec) -> PathBuf {
        self.dir.join(&spec.source)
    }

    pub fn install_script(&self) -> PathBuf {
        self.dir.join("install.sh")
    }

    pub fn verify_script(&self) -> Option<PathBuf> {
        let path = self.dir.join("verify.sh");
        path.exists().then_some(path)
    }

    /// Per-OS pre-hook: `os/<os>.sh` wins over `os/<family>.sh`. A missing
    /// file is a no-op; a present-but-empty file is still executed.
    pub fn os_script(&self, os: &str, family: &str) -> Option<PathBuf> {
        for candidate in [os, family] {
            let path = self.dir.join("os").join(format!("{}.sh", candidate));
            if path.exists() {
                return Some(path);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let yaml = r#"
name: git
version: "1.0.0"
description: Git configuration
"#;
        let manifest = ModuleManifest::from_str(yaml).unwrap();
        assert_eq!(manifest.name, "git");
        assert_eq!(manifest.priority, 50);
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.os.is_empty());
        assert!(manifest.files.is_empty());
        assert!(manifest.notes.is_none());
    }

    #[test]
    fn test_parse_full_featured() {
        let yaml = r#"
name: zsh
version: "2.1.0"
description: Z shell with plugins
priority: 20
dependencies: [git]
os: [linux, darwin]
requires: [curl]
files:
  - source: files/zshrc
    dest: ~/.zshrc
    type: template
  - source: files/zprofile
    dest: ~/.zprofile
    type: copy
    mode: "0644"
prompts:
  - key: theme
    message: Which prompt theme?
    type: choice
    default: minimal
    options: [minimal, powerline]
    show_when: explicit_install
  - key: set_default
    message: Make zsh the login shell?
    type: confirm
    default: "true"
    show_when: always
notes: Restart your terminal to pick up the new shell.
"#;
        let manifest = ModuleManifest::from_str(yaml).unwrap();
        assert_eq!(manifest.priority, 20);
        assert_eq!(manifest.dependencies, vec!["git"]);
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.files[0].kind, FileKind::Template);
        assert_eq!(manifest.files[1].mode, Some(0o644));
        assert_eq!(manifest.prompts[0].kind, PromptKind::Choice);
        assert_eq!(manifest.prompts[0].show_when, ShowWhen::ExplicitInstall);
        assert_eq!(manifest.prompts[1].show_when, ShowWhen::Always);
        assert!(manifest.notes.is_some());
    }

    #[test]
    fn test_invalid_name() {
        let yaml = r#"
name: Git
version: "1.0.0"
"#;
        assert!(ModuleManifest::from_str(yaml).is_err());
    }

    #[test]
    fn test_relative_dest_rejected() {
        let yaml = r#"
name: git
version: "1.0.0"
files:
  - source: files/gitconfig
    dest: .gitconfig
"#;
        assert!(ModuleManifest::from_str(yaml).is_err());
    }

    #[test]
    fn test_tilde_dest_accepted() {
        let yaml = r#"
name: git
version: "1.0.0"
files:
  - source: files/gitconfig
    dest: ~/.gitconfig
"#;
        let manifest = ModuleManifest::from_str(yaml).unwrap();
        assert_eq!(manifest.files[0].kind, FileKind::Symlink);
    }

    #[test]
    fn test_choice_without_options_rejected() {
        let yaml = r#"
name: git
version: "1.0.0"
prompts:
  - key: flavor
    message: Pick one
    type: choice
"#;
        assert!(ModuleManifest::from_str(yaml).is_err());
    }

    #[test]
    fn test_choice_default_must_be_an_option() {
        let yaml = r#"
name: git
version: "1.0.0"
prompts:
  - key: flavor
    message: Pick one
    type: choice
    default: vanilla
    options: [chocolate]
"#;
        assert!(ModuleManifest::from_str(yaml).is_err());
    }

    #[test]
    fn test_integer_mode() {
        let yaml = r#"
name: git
version: "1.0.0"
files:
  - source: files/hook
    dest: /tmp/hook
    type: copy
    mode: 493
"#;
        let manifest = ModuleManifest::from_str(yaml).unwrap();
        assert_eq!(manifest.files[0].mode, Some(493)); // 0o755
    }
}
