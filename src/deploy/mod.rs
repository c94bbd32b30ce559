pub mod backup;

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::error::{DotsmithError, Result};
use crate::events::{Event, Observer};
use crate::module::{FileKind, FileSpec, ModuleManifest};
use crate::state::{FileState, Operation, OperationType};
use crate::template::{TemplateContext, TemplateRenderer};
use crate::util::checksum;

use backup::{BackupManager, Outcome};

/// What the decision table concluded for one FileSpec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployAction {
    /// Destination already matches; nothing to do.
    Skip,
    Deploy {
        /// Whether prior content must be moved aside first.
        backup: bool,
        /// The user edited the deployed file since we last wrote it.
        user_modified: bool,
        /// Decision-table row, for events and the operations log.
        cause: &'static str,
    },
}

/// Result of deploying every FileSpec of one module.
#[derive(Debug, Default)]
pub struct DeployOutcome {
    pub file_states: Vec<FileState>,
    pub operations: Vec<Operation>,
    pub warnings: Vec<String>,
    /// Count of specs that actually changed the filesystem (or would have,
    /// in dry-run).
    pub changed: usize,
}

pub struct FileDeployer<'a> {
    pub module: &'a ModuleManifest,
    pub renderer: &'a dyn TemplateRenderer,
    pub context: &'a TemplateContext,
    pub observer: &'a dyn Observer,
    pub home: PathBuf,
    pub dry_run: bool,
    pub force: bool,
}

impl<'a> FileDeployer<'a> {
    /// Expand `~` against the run's home directory.
    pub fn expand_dest(&self, dest: &str) -> PathBuf {
        if let Some(rest) = dest.strip_prefix("~/") {
            self.home.join(rest)
        } else if dest == "~" {
            self.home.clone()
        } else {
            PathBuf::from(shellexpand::tilde(dest).as_ref())
        }
    }

    /// Deploy every FileSpec in declaration order. A failure aborts the
    /// remaining specs; everything already done stays in `outcome` so the
    /// caller can persist it alongside the failure.
    pub fn deploy_all(&self, prior: &[FileState], outcome: &mut DeployOutcome) -> Result<()> {
        let backups = BackupManager::new(self.dry_run);

        for spec in &self.module.files {
            let dest = self.expand_dest(&spec.dest);
            let source = self.module.source_path(spec);
            let recorded = prior.iter().find(|f| f.dest == dest);

            let action = self.decide(spec, &source, &dest, recorded)?;
            match action {
                DeployAction::Skip => {
                    self.observer.event(&Event::Deploy {
                        module: self.module.name.clone(),
                        dest: dest.display().to_string(),
                        action: "skip".to_string(),
                    });
                    let now = Utc::now();
                    let carried = match recorded {
                        Some(r) => {
                            let mut c = r.clone();
                            c.last_checked = now;
                            c
                        }
                        // A correct symlink with no record yet (for example a
                        // link left by a previous tool): adopt it.
                        None => FileState {
                            source: source.clone(),
                            dest: dest.clone(),
                            kind: spec.kind.to_string(),
                            deployed_at: now,
                            source_hash: checksum::file_hash(&source)?,
                            deployed_hash: checksum::file_hash(&dest)?,
                            user_modified: false,
                            last_checked: now,
                        },
                    };
                    outcome.file_states.push(carried);
                }
                DeployAction::Deploy {
                    backup,
                    user_modified,
                    cause,
                } => {
                    if user_modified {
                        let message = format!(
                            "{} was modified since deployment; backing up before overwrite",
                            dest.display()
                        );
                        self.observer.event(&Event::Warn {
                            module: self.module.name.clone(),
                            message: message.clone(),
                        });
                        outcome.warnings.push(message);
                    }

                    let state = self.deploy_one(
                        spec,
                        &source,
                        &dest,
                        backup,
                        user_modified,
                        cause,
                        &backups,
                        outcome,
                    )?;
                    outcome.file_states.push(state);
                    outcome.changed += 1;
                }
            }
        }

        Ok(())
    }

    /// The deployment decision table (spec'd rows, evaluated top-down).
    fn decide(
        &self,
        spec: &FileSpec,
        source: &Path,
        dest: &Path,
        recorded: Option<&FileState>,
    ) -> Result<DeployAction> {
        let dest_meta = dest.symlink_metadata().ok();

        let Some(dest_meta) = dest_meta else {
            return Ok(DeployAction::Deploy {
                backup: false,
                user_modified: false,
                cause: "absent",
            });
        };

        if self.force {
            return Ok(DeployAction::Deploy {
                backup: true,
                user_modified: false,
                cause: "forced",
            });
        }

        if dest_meta.file_type().is_symlink() {
            if spec.kind == FileKind::Symlink {
                let target = std::fs::read_link(dest)?;
                if target == source {
                    return Ok(DeployAction::Skip);
                }
                return Ok(DeployAction::Deploy {
                    backup: true,
                    user_modified: false,
                    cause: "wrong_target",
                });
            }
            // Symlink on disk, spec wants a file.
            return Ok(DeployAction::Deploy {
                backup: true,
                user_modified: false,
                cause: "type_mismatch",
            });
        }

        if spec.kind == FileKind::Symlink {
            // Regular file on disk, spec wants a symlink.
            return Ok(DeployAction::Deploy {
                backup: true,
                user_modified: false,
                cause: "type_mismatch",
            });
        }

        let Some(recorded) = recorded.filter(|r| !r.deployed_hash.is_empty()) else {
            // Nothing on record (or a migrated record without hashes): we
            // cannot prove the bytes are ours, so preserve them.
            return Ok(DeployAction::Deploy {
                backup: true,
                user_modified: false,
                cause: "untracked",
            });
        };

        let dest_hash = checksum::file_hash(dest)?;
        let source_hash = checksum::file_hash(source)?;

        if dest_hash == recorded.deployed_hash {
            if source_hash == recorded.source_hash {
                return Ok(DeployAction::Skip);
            }
            return Ok(DeployAction::Deploy {
                backup: true,
                user_modified: false,
                cause: "source_changed",
            });
        }

        Ok(DeployAction::Deploy {
            backup: true,
            user_modified: true,
            cause: "user_modified",
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn deploy_one(
        &self,
        spec: &FileSpec,
        source: &Path,
        dest: &Path,
        backup: bool,
        user_modified: bool,
        cause: &'static str,
        backups: &BackupManager,
        outcome: &mut DeployOutcome,
    ) -> Result<FileState> {
        self.observer.event(&Event::Deploy {
            module: self.module.name.clone(),
            dest: dest.display().to_string(),
            action: format!("deploy ({})", cause),
        });

        // Parent directories first, so the backup/rename has somewhere to live.
        if let Some(parent) = dest.parent() {
            if !parent.exists() {
                if !self.dry_run {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        DotsmithError::DeployFailed(format!(
                            "failed to create {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let _ = std::fs::set_permissions(
                            parent,
                            std::fs::Permissions::from_mode(0o755),
                        );
                    }
                }
                outcome.operations.push(Operation::new(
                    OperationType::DirCreate,
                    "create",
                    parent,
                ));
            }
        }

        let handle = if backup {
            backups.backup(dest)?
        } else {
            backup::BackupHandle::null()
        };

        let source_hash = checksum::file_hash(source)?;
        let deployed_hash = if self.dry_run {
            String::new()
        } else {
            match spec.kind {
                FileKind::Symlink => self.place_symlink(source, dest)?,
                FileKind::Copy => self.place_copy(spec, source, dest)?,
                FileKind::Template => self.place_template(spec, source, dest)?,
            }
        };

        if !self.dry_run {
            if let Some(entry) = handle.entry() {
                let message = format!("backup retained at {}", entry.backup.display());
                debug!("{}: {}", self.module.name, message);
                outcome.warnings.push(message);
            }
        }
        let backup_path = handle.backup_path().map(|p| p.display().to_string());
        handle.release(Outcome::Commit)?;

        let mut op = Operation::new(OperationType::FileDeploy, action_for(cause), dest)
            .with_meta("source", spec.source.display().to_string())
            .with_meta("type", spec.kind.to_string());
        if let Some(backup_path) = backup_path {
            op = op.with_meta("backup", backup_path);
        }
        outcome.operations.push(op);

        let now = Utc::now();
        Ok(FileState {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            kind: spec.kind.to_string(),
            deployed_at: now,
            source_hash,
            deployed_hash,
            user_modified,
            last_checked: now,
        })
    }

    /// Create/replace a symlink to the absolute source. Returns the hash of
    /// the link target string, matching what `file_hash(dest)` will observe.
    fn place_symlink(&self, source: &Path, dest: &Path) -> Result<String> {
        if dest.symlink_metadata().is_ok() {
            std::fs::remove_file(dest)?;
        }
        std::os::unix::fs::symlink(source, dest).map_err(|e| {
            DotsmithError::DeployFailed(format!(
                "failed to link {} -> {}: {}",
                dest.display(),
                source.display(),
                e
            ))
        })?;
        Ok(checksum::sha256_bytes(
            source.to_string_lossy().as_bytes(),
        ))
    }

    /// Byte-for-byte copy preserving source permissions.
    fn place_copy(&self, spec: &FileSpec, source: &Path, dest: &Path) -> Result<String> {
        if dest.symlink_metadata().is_ok() {
            std::fs::remove_file(dest)?;
        }
        std::fs::copy(source, dest).map_err(|e| {
            DotsmithError::DeployFailed(format!(
                "failed to copy {} to {}: {}",
                source.display(),
                dest.display(),
                e
            ))
        })?;
        self.apply_mode(spec, dest)?;
        checksum::file_hash(dest)
    }

    fn place_template(&self, spec: &FileSpec, source: &Path, dest: &Path) -> Result<String> {
        let rendered = self.renderer.render_file(source, self.context)?;
        if dest.symlink_metadata().is_ok() {
            std::fs::remove_file(dest)?;
        }
        std::fs::write(dest, &rendered).map_err(|e| {
            DotsmithError::DeployFailed(format!("failed to write {}: {}", dest.display(), e))
        })?;
        // Rendered output keeps the template's permissions unless overridden.
        let source_perms = std::fs::metadata(source)?.permissions();
        std::fs::set_permissions(dest, source_perms)?;
        self.apply_mode(spec, dest)?;
        Ok(checksum::sha256_bytes(rendered.as_bytes()))
    }

    fn apply_mode(&self, spec: &FileSpec, dest: &Path) -> Result<()> {
        #[cfg(unix)]
        if let Some(mode) = spec.mode {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dest, std::fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }
}

fn action_for(cause: &str) -> &'static str {
    match cause {
        "absent" => "install",
        "source_changed" => "modified",
        "user_modified" => "modified",
        "forced" => "forced",
        _ => "update",
    }
}

/// True when any recorded FileState diverges from what is on disk now:
/// source edited, destination edited or gone, or a migrated record whose
/// hashes were never captured.
pub fn detect_drift(file_states: &[FileState]) -> bool {
    file_states.iter().any(|f| {
        if f.deployed_hash.is_empty() {
            return true;
        }
        let source_now = checksum::file_hash(&f.source).unwrap_or_default();
        if source_now != f.source_hash {
            return true;
        }
        let dest_now = checksum::file_hash(&f.dest).unwrap_or_default();
        dest_now != f.deployed_hash
    })
}
