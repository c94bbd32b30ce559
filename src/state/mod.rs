use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DotsmithError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Installed,
    Failed,
    Removed,
}

/// Persisted record for one module, one JSON document per module.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModuleState {
    pub name: String,
    pub version: String,
    pub status: ModuleStatus,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub os: String,
    #[serde(default)]
    pub error: Option<String>,
    /// Hash of module.yml plus every file in the module directory.
    #[serde(default)]
    pub checksum: String,
    /// Hash of the module-scoped user configuration subtree.
    #[serde(default)]
    pub config_hash: String,
    #[serde(default)]
    pub file_states: Vec<FileState>,
    /// Append-only audit log, oldest first.
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileState {
    pub source: PathBuf,
    pub dest: PathBuf,
    #[serde(rename = "type")]
    pub kind: String,
    pub deployed_at: DateTime<Utc>,
    pub source_hash: String,
    /// Hash of dest's content at deploy time. Empty for states reconstructed
    /// from the operations log.
    #[serde(default)]
    pub deployed_hash: String,
    #[serde(default)]
    pub user_modified: bool,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    FileDeploy,
    DirCreate,
    ScriptRun,
    PackageInstall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationType,
    pub action: String,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: std::collections::BTreeMap<String, String>,
}

impl Operation {
    pub fn new(kind: OperationType, action: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            action: action.into(),
            path: path.into(),
            timestamp: Utc::now(),
            metadata: Default::default(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl ModuleState {
    /// A state written before file_states existed needs its file records
    /// reconstructed before drift detection means anything.
    pub fn needs_migration(&self) -> bool {
        self.status == ModuleStatus::Installed
            && self.file_states.is_empty()
            && self
                .operations
                .iter()
                .any(|op| op.kind == OperationType::FileDeploy)
    }

    /// Best-effort FileStates from the operations log. `deployed_hash` is
    /// left empty, which forces one re-deploy on the next run and restores
    /// full fidelity.
    pub fn migrate_file_states(&mut self) {
        if !self.needs_migration() {
            return;
        }
        let mut reconstructed = Vec::new();
        for op in &self.operations {
            if op.kind != OperationType::FileDeploy {
                continue;
            }
            let source = op
                .metadata
                .get("source")
                .map(PathBuf::from)
                .unwrap_or_default();
            let kind = op
                .metadata
                .get("type")
                .cloned()
                .unwrap_or_else(|| "copy".to_string());
            reconstructed.push(FileState {
                source,
                dest: op.path.clone(),
                kind,
                deployed_at: op.timestamp,
                source_hash: String::new(),
                deployed_hash: String::new(),
                user_modified: false,
                last_checked: op.timestamp,
            });
        }
        warn!(
            "reconstructed {} file state(s) for {} from the operations log",
            reconstructed.len(),
            self.name
        );
        self.file_states = reconstructed;
    }
}

/// One JSON document per module at `<state_dir>/<name>.json`. The state
/// directory is the only shared mutable store; writes are atomic
/// (write-then-rename within the same directory).
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// The directory is not touched until the first write, so read-only and
    /// dry-run invocations leave the filesystem byte-identical.
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the state directory on demand with mode 0755.
    pub fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o755))?;
            }
        }
        Ok(())
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Missing file is `None`, not an error.
    pub fn get(&self, name: &str) -> Result<Option<ModuleState>> {
        let path = self.path_for(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: ModuleState = serde_json::from_str(&content).map_err(|e| {
            DotsmithError::StateError(format!("corrupt state file {}: {}", path.display(), e))
        })?;
        Ok(Some(state))
    }

    /// Stamps `updated_at` and writes atomically.
    pub fn set(&self, state: &ModuleState) -> Result<()> {
        self.ensure_dir()?;

        let mut state = state.clone();
        state.updated_at = Utc::now();

        let path = self.path_for(&state.name);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, &state)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&path)
            .map_err(|e| DotsmithError::StateError(format!("persisting {}: {}", path.display(), e)))?;
        debug!("wrote state for {}", state.name);
        Ok(())
    }

    /// Every `*.json` document in the state directory; order unspecified.
    pub fn get_all(&self) -> Result<Vec<ModuleState>> {
        let mut states = Vec::new();
        if !self.dir.exists() {
            return Ok(states);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<ModuleState>(&content) {
                Ok(state) => states.push(state),
                Err(e) => warn!("skipping corrupt state file {}: {}", path.display(), e),
            }
        }
        Ok(states)
    }

    /// No-op when absent.
    pub fn remove(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
