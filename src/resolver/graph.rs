use std::collections::HashSet;

use tracing::debug;

use crate::error::{DotsmithError, Result};
use crate::host::HostInfo;
use crate::module::ModuleRegistry;
use crate::resolver::SkipReason;

/// Transitive closure of a selection over `dependencies`.
pub struct Closure {
    /// Every module reachable from the selection.
    pub members: HashSet<String>,
    /// The subset that was in the initial selection.
    pub explicitly_requested: HashSet<String>,
}

/// Recursively resolve dependencies for the selected modules.
pub fn closure(registry: &ModuleRegistry, selection: &[String]) -> Result<Closure> {
    let mut queue: Vec<String> = selection.to_vec();
    let mut members = HashSet::new();

    while let Some(name) = queue.pop() {
        if members.contains(&name) {
            continue;
        }

        let manifest = registry
            .get(&name)
            .ok_or_else(|| DotsmithError::UnknownModule(name.clone()))?;

        for dep in &manifest.dependencies {
            if !members.contains(dep) {
                queue.push(dep.clone());
            }
        }

        members.insert(name);
    }

    Ok(Closure {
        members,
        explicitly_requested: selection.iter().cloned().collect(),
    })
}

pub struct OsPartition {
    /// Modules that survive the OS filter, in no particular order.
    pub runnable: HashSet<String>,
    /// Filtered modules and the modules stranded by them.
    pub skipped: Vec<(String, SkipReason)>,
}

/// Apply the host OS filter to a closure.
///
/// An explicitly requested module that does not support this host fails the
/// plan with `OsMismatch`. A transitively pulled one is skipped, and every
/// module in the closure that (transitively) depends on it is skipped with
/// reason `dependency_filtered`.
pub fn partition_by_os(
    registry: &ModuleRegistry,
    closure: &Closure,
    host: &HostInfo,
) -> Result<OsPartition> {
    let mut filtered: HashSet<String> = HashSet::new();

    for name in &closure.members {
        let manifest = registry.get(name).expect("closure members are loaded");
        if !host.matches(&manifest.os) {
            if closure.explicitly_requested.contains(name) {
                return Err(DotsmithError::OsMismatch {
                    module: name.clone(),
                    os: host.os.clone(),
                });
            }
            debug!("{} filtered out on {}", name, host.os);
            filtered.insert(name.clone());
        }
    }

    // Cascade: anything that depends on a filtered module cannot run either.
    let mut stranded: HashSet<String> = HashSet::new();
    loop {
        let mut changed = false;
        for name in &closure.members {
            if filtered.contains(name) || stranded.contains(name) {
                continue;
            }
            let manifest = registry.get(name).expect("closure members are loaded");
            let blocked = manifest
                .dependencies
                .iter()
                .any(|d| filtered.contains(d) || stranded.contains(d));
            if blocked {
                stranded.insert(name.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let runnable: HashSet<String> = closure
        .members
        .iter()
        .filter(|n| !filtered.contains(*n) && !stranded.contains(*n))
        .cloned()
        .collect();

    let mut skipped: Vec<(String, SkipReason)> = filtered
        .into_iter()
        .map(|n| (n, SkipReason::OsMismatch))
        .chain(
            stranded
                .into_iter()
                .map(|n| (n, SkipReason::DependencyFiltered)),
        )
        .collect();
    skipped.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(OsPartition { runnable, skipped })
}
