#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dotsmith::config::GlobalConfig;
use dotsmith::events::{CollectingObserver, Observer};
use dotsmith::host::HostInfo;
use dotsmith::module::ModuleRegistry;
use dotsmith::orchestrator::{Orchestrator, Summary};
use dotsmith::runner::prompt::DefaultsPrompter;
use dotsmith::runner::{ModuleRunner, RunOptions};
use dotsmith::secrets::StaticSecrets;
use dotsmith::state::StateStore;
use dotsmith::template::HandlebarsRenderer;

/// A throwaway dotfiles repository plus a fake home directory.
pub struct Sandbox {
    pub dotfiles: tempfile::TempDir,
    pub home: tempfile::TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let sandbox = Self {
            dotfiles: tempfile::tempdir().unwrap(),
            home: tempfile::tempdir().unwrap(),
        };
        std::fs::create_dir_all(sandbox.modules_dir()).unwrap();
        sandbox.write_config(
            "user:\n  name: Test User\n  email: test@example.com\n  github_user: testuser\n",
        );
        sandbox
    }

    pub fn write_config(&self, content: &str) {
        std::fs::write(self.dotfiles.path().join("config.yml"), content).unwrap();
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.dotfiles.path().join("modules")
    }

    pub fn module_dir(&self, name: &str) -> PathBuf {
        self.modules_dir().join(name)
    }

    pub fn home_path(&self, rel: &str) -> PathBuf {
        self.home.path().join(rel)
    }

    /// Create a module directory with a manifest, an install script, and
    /// bundled files.
    pub fn add_module(&self, name: &str, manifest: &str, files: &[(&str, &str)]) {
        let dir = self.module_dir(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("module.yml"), manifest).unwrap();
        if !dir.join("install.sh").exists() {
            std::fs::write(dir.join("install.sh"), "#!/bin/bash\n").unwrap();
        }
        for (rel, content) in files {
            let path = dir.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
    }

    pub fn write_script(&self, module: &str, rel: &str, content: &str) {
        let path = self.module_dir(module).join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn config(&self) -> GlobalConfig {
        GlobalConfig::load(self.dotfiles.path(), None).unwrap()
    }

    pub fn host(&self) -> HostInfo {
        HostInfo {
            os: "ubuntu".to_string(),
            family: "linux".to_string(),
            arch: "x86_64".to_string(),
            pkg_mgr: None,
            has_sudo: false,
            home: self.home.path().to_path_buf(),
        }
    }

    pub fn registry(&self) -> ModuleRegistry {
        ModuleRegistry::load(&self.modules_dir()).unwrap()
    }

    pub fn store(&self) -> StateStore {
        StateStore::open(&self.config().state_dir()).unwrap()
    }

    pub fn run(&self, selection: &[&str], options: RunOptions) -> Summary {
        self.run_observed(selection, options, &CollectingObserver::default())
    }

    pub fn run_observed(
        &self,
        selection: &[&str],
        options: RunOptions,
        observer: &dyn Observer,
    ) -> Summary {
        self.run_with_prompter(selection, options, observer, &DefaultsPrompter)
    }

    pub fn run_with_prompter(
        &self,
        selection: &[&str],
        options: RunOptions,
        observer: &dyn Observer,
        prompter: &dyn dotsmith::runner::prompt::Prompter,
    ) -> Summary {
        let config = self.config();
        let host = self.host();
        let registry = self.registry();
        let store = self.store();
        let renderer = HandlebarsRenderer::new();
        let secrets = StaticSecrets::new(BTreeMap::new());

        let runner = ModuleRunner::new(
            &config, &host, &store, observer, &renderer, &secrets, prompter, options,
        );
        let orchestrator = Orchestrator {
            registry: &registry,
            host: &host,
            runner,
            observer,
        };

        orchestrator
            .run(&selection.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .unwrap()
    }
}

/// Recursive listing of (relative path, content hash or link target) used to
/// assert that dry runs touch nothing.
pub fn snapshot_tree(root: &Path) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for entry in walkdir_sorted(root) {
        let rel = entry.strip_prefix(root).unwrap().display().to_string();
        let meta = entry.symlink_metadata().unwrap();
        let token = if meta.file_type().is_symlink() {
            format!("link:{}", std::fs::read_link(&entry).unwrap().display())
        } else if meta.is_file() {
            format!("file:{}", std::fs::read_to_string(&entry).unwrap_or_default())
        } else {
            "dir".to_string()
        };
        entries.push((rel, token));
    }
    entries
}

fn walkdir_sorted(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .filter(|p| p != root)
        .collect();
    paths.sort();
    paths
}
