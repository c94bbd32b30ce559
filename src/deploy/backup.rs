use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{DotsmithError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep the displaced file on disk for audit.
    Commit,
    /// Move the displaced file back over whatever now sits at the original path.
    Revert,
}

/// Moves files aside before they are overwritten. Every acquisition returns a
/// handle that guarantees release: a handle dropped without an explicit
/// outcome reverts, so a failed deploy can never eat the user's file.
pub struct BackupManager {
    dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub original: PathBuf,
    pub backup: PathBuf,
    pub performed_at: DateTime<Utc>,
}

pub struct BackupHandle {
    entry: Option<BackupEntry>,
    dry_run: bool,
    armed: bool,
}

impl BackupManager {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Displace `path` to `<path>.backup.<YYYYMMDDHHMMSS>`. A missing path
    /// yields a null handle whose release is a no-op. Collisions within the
    /// same second get a monotonic counter suffix; the chosen name is
    /// guaranteed unused.
    pub fn backup(&self, path: &Path) -> Result<BackupHandle> {
        if path.symlink_metadata().is_err() {
            return Ok(BackupHandle {
                entry: None,
                dry_run: self.dry_run,
                armed: false,
            });
        }

        let performed_at = Utc::now();
        let backup = unique_backup_path(path, &performed_at);

        if self.dry_run {
            debug!(
                "dry-run: would back up {} to {}",
                path.display(),
                backup.display()
            );
            return Ok(BackupHandle {
                entry: Some(BackupEntry {
                    original: path.to_path_buf(),
                    backup,
                    performed_at,
                }),
                dry_run: true,
                armed: false,
            });
        }

        std::fs::rename(path, &backup).map_err(|e| {
            DotsmithError::DeployFailed(format!(
                "failed to back up {} to {}: {}",
                path.display(),
                backup.display(),
                e
            ))
        })?;
        debug!("backed up {} to {}", path.display(), backup.display());

        Ok(BackupHandle {
            entry: Some(BackupEntry {
                original: path.to_path_buf(),
                backup,
                performed_at,
            }),
            dry_run: false,
            armed: true,
        })
    }
}

fn unique_backup_path(path: &Path, at: &DateTime<Utc>) -> PathBuf {
    let stamp = at.format("%Y%m%d%H%M%S");
    let base = format!("{}.backup.{}", path.display(), stamp);
    let mut candidate = PathBuf::from(&base);
    let mut counter = 1u32;
    while candidate.symlink_metadata().is_ok() {
        candidate = PathBuf::from(format!("{}.{}", base, counter));
        counter += 1;
    }
    candidate
}

impl BackupHandle {
    /// A handle over nothing; release is a no-op.
    pub fn null() -> Self {
        Self {
            entry: None,
            dry_run: false,
            armed: false,
        }
    }

    pub fn is_null(&self) -> bool {
        self.entry.is_none()
    }

    pub fn entry(&self) -> Option<&BackupEntry> {
        self.entry.as_ref()
    }

    pub fn backup_path(&self) -> Option<&Path> {
        self.entry.as_ref().map(|e| e.backup.as_path())
    }

    pub fn release(mut self, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Commit => {
                self.armed = false;
                Ok(())
            }
            Outcome::Revert => {
                self.armed = false;
                self.restore()
            }
        }
    }

    fn restore(&self) -> Result<()> {
        let Some(ref entry) = self.entry else {
            return Ok(());
        };
        if self.dry_run {
            return Ok(());
        }
        // Overwrites whatever is now at the original path.
        if entry.original.symlink_metadata().is_ok() {
            let _ = std::fs::remove_file(&entry.original);
        }
        std::fs::rename(&entry.backup, &entry.original).map_err(|e| {
            DotsmithError::DeployFailed(format!(
                "failed to restore {} from {}: {}",
                entry.original.display(),
                entry.backup.display(),
                e
            ))
        })
    }
}

impl Drop for BackupHandle {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.restore() {
            if let Some(ref entry) = self.entry {
                warn!(
                    "failed to restore backup {} on release: {}",
                    entry.backup.display(),
                    e
                );
            }
        }
    }
}
