use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{DotsmithError, Result};
use crate::module::ModuleRegistry;

/// Deterministic topological order over a set of modules.
///
/// Kahn-style peeling with a twist that makes `priority` behave the way
/// users expect: a dependency inherits the urgency of its most urgent
/// dependent (effective priority = min over itself and everything that
/// depends on it). The ready queue is seeded with indegree-zero modules
/// sorted ascending by `(effective_priority, name)`; modules unlocked later
/// are appended in that same sort order as their last dependency completes.
///
/// The resulting order is a hard contract: identical inputs yield
/// byte-identical plans.
pub fn sort(registry: &ModuleRegistry, members: &HashSet<String>) -> Result<Vec<String>> {
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut indegree: HashMap<&str, usize> = HashMap::new();

    for name in members {
        let manifest = registry.get(name).expect("plan members are loaded");
        let in_set: Vec<&str> = manifest
            .dependencies
            .iter()
            .filter(|d| members.contains(*d))
            .map(|d| d.as_str())
            .collect();
        indegree.insert(name.as_str(), in_set.len());
        for dep in in_set {
            dependents.entry(dep).or_default().push(name.as_str());
        }
    }

    let effective = effective_priorities(registry, members, &dependents);

    let key = |name: &str| (effective[name], name.to_string());

    let mut seed: Vec<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    seed.sort_by_key(|n| key(n));

    let mut queue: VecDeque<&str> = seed.into_iter().collect();
    let mut order: Vec<String> = Vec::with_capacity(members.len());

    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());

        let mut unlocked: Vec<&str> = Vec::new();
        if let Some(children) = dependents.get(name) {
            for child in children {
                let d = indegree.get_mut(child).expect("dependent is a member");
                *d -= 1;
                if *d == 0 {
                    unlocked.push(*child);
                }
            }
        }
        unlocked.sort_by_key(|n| key(n));
        for child in unlocked {
            queue.push_back(child);
        }
    }

    if order.len() != members.len() {
        let mut remaining: Vec<String> = members
            .iter()
            .filter(|n| !order.contains(*n))
            .cloned()
            .collect();
        remaining.sort();
        return Err(DotsmithError::Cycle(remaining));
    }

    Ok(order)
}

/// `eff(m) = min(priority(m), min eff over modules that depend on m)`,
/// computed as a fixpoint; the member set is small.
fn effective_priorities<'a>(
    registry: &ModuleRegistry,
    members: &'a HashSet<String>,
    dependents: &HashMap<&'a str, Vec<&'a str>>,
) -> HashMap<&'a str, i32> {
    let mut effective: HashMap<&str, i32> = members
        .iter()
        .map(|n| {
            (
                n.as_str(),
                registry.get(n).expect("plan members are loaded").priority,
            )
        })
        .collect();

    loop {
        let mut changed = false;
        for name in members {
            let Some(children) = dependents.get(name.as_str()) else {
                continue;
            };
            let min_child = children.iter().map(|c| effective[c]).min();
            if let Some(min_child) = min_child {
                let current = effective[name.as_str()];
                if min_child < current {
                    effective.insert(name.as_str(), min_child);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    effective
}
