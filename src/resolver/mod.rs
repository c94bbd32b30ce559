pub mod graph;
pub mod topo;

use std::collections::HashSet;

use crate::error::Result;
use crate::host::HostInfo;
use crate::module::ModuleRegistry;

/// Why a module was excluded from execution at planning time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The module's `os` set excludes this host.
    OsMismatch,
    /// A transitive dependency was excluded by the OS filter.
    DependencyFiltered,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::OsMismatch => write!(f, "os_mismatch"),
            SkipReason::DependencyFiltered => write!(f, "dependency_filtered"),
        }
    }
}

/// The resolved, ordered set of modules for a single run. Two runs with the
/// same inputs produce byte-identical plans.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Execution order; every dependency precedes its dependents.
    pub order: Vec<String>,
    /// Modules named directly by the invoker, as opposed to pulled in via
    /// `dependencies`. Drives prompt gating.
    pub explicitly_requested: HashSet<String>,
    /// Modules excluded at planning time, with reasons.
    pub skipped: Vec<(String, SkipReason)>,
}

impl ExecutionPlan {
    pub fn is_explicit(&self, name: &str) -> bool {
        self.explicitly_requested.contains(name)
    }
}

/// Resolve a selection into an ExecutionPlan: transitive closure, OS filter,
/// then deterministic topological order.
pub fn resolve(
    registry: &ModuleRegistry,
    selection: &[String],
    host: &HostInfo,
) -> Result<ExecutionPlan> {
    let closure = graph::closure(registry, selection)?;
    let partition = graph::partition_by_os(registry, &closure, host)?;
    let order = topo::sort(registry, &partition.runnable)?;

    Ok(ExecutionPlan {
        order,
        explicitly_requested: closure.explicitly_requested,
        skipped: partition.skipped,
    })
}
