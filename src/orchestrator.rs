use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{DotsmithError, DotsmithResultExt, Result};
use crate::events::{Event, Observer};
use crate::host::HostInfo;
use crate::module::ModuleRegistry;
use crate::resolver::{self, ExecutionPlan};
use crate::runner::{ModuleOutcome, ModuleRunner};
use crate::state::StateStore;
use crate::util::checksum;

/// End-of-run report. Exit status is derived from `failed` alone.
#[derive(Debug, Default, Clone)]
pub struct Summary {
    pub installed: Vec<String>,
    pub updated: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
    /// Post-install notes from modules that installed or updated.
    pub notes: Vec<(String, String)>,
}

impl Summary {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Advisory lock over the state directory. Two simultaneous invocations are
/// undefined behaviour per the concurrency model; this only warns.
struct LockFile {
    path: Option<PathBuf>,
}

impl LockFile {
    fn acquire(state_dir: &std::path::Path) -> Self {
        let path = state_dir.join(".lock");
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut f) => {
                use std::io::Write;
                let _ = write!(f, "{}", std::process::id());
                Self { path: Some(path) }
            }
            Err(_) => {
                warn!(
                    "another dotsmith invocation may be running (lock file {} exists)",
                    path.display()
                );
                Self { path: None }
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Some(ref path) = self.path {
            let _ = std::fs::remove_file(path);
        }
    }
}

pub struct Orchestrator<'a> {
    pub registry: &'a ModuleRegistry,
    pub host: &'a HostInfo,
    pub runner: ModuleRunner<'a>,
    pub observer: &'a dyn Observer,
}

impl<'a> Orchestrator<'a> {
    /// Build the plan for a selection without executing it.
    pub fn plan(&self, selection: &[String]) -> Result<ExecutionPlan> {
        resolver::resolve(self.registry, selection, self.host)
    }

    /// Resolve, order, and execute a selection of modules, strictly
    /// sequentially in plan order.
    pub fn run(&self, selection: &[String]) -> Result<Summary> {
        let plan = self.plan(selection)?;
        info!(
            "plan: {} module(s) to process, {} filtered",
            plan.order.len(),
            plan.skipped.len()
        );

        let _lock = if self.runner.options.dry_run {
            None
        } else {
            self.runner.store.ensure_dir()?;
            Some(LockFile::acquire(self.runner.store.dir()))
        };

        let mut summary = Summary::default();
        for (name, reason) in &plan.skipped {
            summary.skipped.push((name.clone(), reason.to_string()));
        }

        // Modules that failed this run, or were skipped because a dependency
        // did; dependents of either cannot run.
        let mut blocked: HashSet<String> = HashSet::new();
        let mut aborted = false;

        for (position, name) in plan.order.iter().enumerate() {
            if aborted {
                summary.skipped.push((name.clone(), "aborted".to_string()));
                continue;
            }

            let module = self.registry.get(name).expect("plan names are loaded");

            if let Some(dep) = module.dependencies.iter().find(|d| blocked.contains(*d)) {
                debug!("{}: dependency {} failed earlier, skipping", name, dep);
                self.observer.event(&Event::Decision {
                    module: name.clone(),
                    action: "skip".to_string(),
                    reason: "dependency_failed".to_string(),
                });
                summary
                    .skipped
                    .push((name.clone(), "dependency_failed".to_string()));
                blocked.insert(name.clone());
                continue;
            }

            info!(
                "[{}/{}] processing {}",
                position + 1,
                plan.order.len(),
                name
            );

            match self.runner.run_module(module, &plan) {
                ModuleOutcome::Installed { notes } => {
                    summary.installed.push(name.clone());
                    if let Some(notes) = notes {
                        summary.notes.push((name.clone(), notes));
                    }
                }
                ModuleOutcome::Updated { notes } => {
                    summary.updated.push(name.clone());
                    if let Some(notes) = notes {
                        summary.notes.push((name.clone(), notes));
                    }
                }
                ModuleOutcome::Skipped { reason } => {
                    summary.skipped.push((name.clone(), reason));
                }
                ModuleOutcome::Failed { error, interrupted } => {
                    summary.failed.push((name.clone(), error));
                    blocked.insert(name.clone());
                    if interrupted {
                        warn!("interrupted; aborting remaining plan");
                        aborted = true;
                    }
                }
            }
        }

        Ok(summary)
    }
}

/// Remove a module's deployed files and its state document.
///
/// Only files that are provably ours are deleted: symlinks still pointing at
/// the module source, and copies/templates whose bytes still match what was
/// deployed. Anything the user touched is left in place with a warning.
pub fn uninstall(
    store: &StateStore,
    observer: &dyn Observer,
    name: &str,
    keep_files: bool,
) -> Result<()> {
    let Some(state) = store.get(name)? else {
        return Err(DotsmithError::UnknownModule(name.to_string()));
    };

    if !keep_files {
        for file in &state.file_states {
            let on_disk = match checksum::file_hash(&file.dest) {
                Ok(h) => h,
                Err(DotsmithError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            let ours = if file.kind == "symlink" {
                std::fs::read_link(&file.dest)
                    .map(|t| t == file.source)
                    .unwrap_or(false)
            } else {
                !file.deployed_hash.is_empty() && on_disk == file.deployed_hash
            };

            if ours {
                std::fs::remove_file(&file.dest)
                    .context(format!("failed to remove {}", file.dest.display()))?;
                info!("removed {}", file.dest.display());
            } else {
                observer.event(&Event::Warn {
                    module: name.to_string(),
                    message: format!(
                        "{} was modified since deployment; leaving it in place",
                        file.dest.display()
                    ),
                });
            }
        }
    }

    store.remove(name)?;
    info!("uninstalled {}", name);
    Ok(())
}
