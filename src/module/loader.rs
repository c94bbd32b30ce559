use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::config::GlobalConfig;
use crate::error::{DotsmithError, Result};
use crate::module::manifest::ModuleManifest;

/// Registry of every module found under the modules directory, keyed by
/// manifest name. Built once per run; manifests are immutable afterwards.
#[derive(Debug)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleManifest>,
}

impl ModuleRegistry {
    /// Scan `modules_dir` for subdirectories containing a `module.yml`.
    ///
    /// Fails with `MalformedManifest` on parse errors, `DuplicateName` when
    /// two directories declare the same module name, and `MissingSource`
    /// when any FileSpec source is absent on disk.
    pub fn load(modules_dir: &Path) -> Result<Self> {
        let mut modules: HashMap<String, ModuleManifest> = HashMap::new();

        if !modules_dir.is_dir() {
            return Err(DotsmithError::ConfigError(format!(
                "modules directory not found: {}",
                modules_dir.display()
            )));
        }

        let mut entries: Vec<_> = std::fs::read_dir(modules_dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();

        for dir in entries {
            let manifest_path = dir.join("module.yml");
            if !manifest_path.exists() {
                debug!("skipping {} (no module.yml)", dir.display());
                continue;
            }

            let manifest = ModuleManifest::from_file(&manifest_path)?;
            validate_layout(&manifest)?;

            if modules.contains_key(&manifest.name) {
                return Err(DotsmithError::DuplicateName(manifest.name));
            }
            debug!("loaded module {} from {}", manifest.name, dir.display());
            modules.insert(manifest.name.clone(), manifest);
        }

        Ok(Self { modules })
    }

    pub fn get(&self, name: &str) -> Option<&ModuleManifest> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Resolve a profile to a validated list of module names.
    pub fn resolve_profile(&self, config: &GlobalConfig, name: &str) -> Result<Vec<String>> {
        let profile = config.profile(name)?;
        for module in &profile.modules {
            if !self.contains(module) {
                return Err(DotsmithError::UnknownModule(module.clone()));
            }
        }
        Ok(profile.modules.clone())
    }

    /// Validate a direct selection of module names.
    pub fn resolve_selection(&self, selection: &[String]) -> Result<Vec<String>> {
        for name in selection {
            if !self.contains(name) {
                return Err(DotsmithError::UnknownModule(name.clone()));
            }
        }
        Ok(selection.to_vec())
    }
}

fn validate_layout(manifest: &ModuleManifest) -> Result<()> {
    if !manifest.install_script().exists() {
        return Err(DotsmithError::ValidationError(format!(
            "module {} is missing install.sh",
            manifest.name
        )));
    }

    for spec in &manifest.files {
        let source = manifest.source_path(spec);
        if source.symlink_metadata().is_err() {
            return Err(DotsmithError::MissingSource {
                module: manifest.name.clone(),
                path: spec.source.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_module(root: &Path, name: &str, manifest: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(dir.join("files")).unwrap();
        std::fs::write(dir.join("module.yml"), manifest).unwrap();
        std::fs::write(dir.join("install.sh"), "#!/bin/bash\n").unwrap();
    }

    #[test]
    fn test_load_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "git", "name: git\nversion: \"1.0.0\"\n");
        write_module(dir.path(), "zsh", "name: zsh\nversion: \"1.0.0\"\n");
        // Non-module directory should be ignored
        std::fs::create_dir_all(dir.path().join("README")).unwrap();

        let registry = ModuleRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("git").is_some());
        assert_eq!(registry.names(), vec!["git", "zsh"]);
    }

    #[test]
    fn test_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "git-a", "name: git\nversion: \"1.0.0\"\n");
        write_module(dir.path(), "git-b", "name: git\nversion: \"1.0.0\"\n");

        let err = ModuleRegistry::load(dir.path()).unwrap_err();
        assert!(matches!(err, DotsmithError::DuplicateName(ref n) if n == "git"));
    }

    #[test]
    fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "git",
            "name: git\nversion: \"1.0.0\"\nfiles:\n  - source: files/gitconfig\n    dest: ~/.gitconfig\n",
        );

        let err = ModuleRegistry::load(dir.path()).unwrap_err();
        assert!(matches!(err, DotsmithError::MissingSource { .. }));
    }

    #[test]
    fn test_missing_install_script() {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("git");
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join("module.yml"), "name: git\nversion: \"1.0.0\"\n").unwrap();

        assert!(ModuleRegistry::load(dir.path()).is_err());
    }

    #[test]
    fn test_unknown_module_in_selection() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "git", "name: git\nversion: \"1.0.0\"\n");

        let registry = ModuleRegistry::load(dir.path()).unwrap();
        let err = registry
            .resolve_selection(&["nope".to_string()])
            .unwrap_err();
        assert!(matches!(err, DotsmithError::UnknownModule(_)));
    }
}
