//! Execution planner - resolves requested modules into an ordered plan
//!
//! Resolution happens in two passes:
//!
//! 1. Depth-first traversal from every target collects the transitive
//!    dependency closure and detects cycles (a back-edge to a module that is
//!    still on the traversal path).
//! 2. A topological sort over the closure whose ready queue is ordered by
//!    name, so the same registry and targets always yield the same plan.

use crate::error::{Error, Result};
use crate::registry::Registry;
use std::collections::{BTreeMap, BTreeSet};

/// An ordered list of modules that respects every dependency
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Modules in execution order
    pub modules: Vec<String>,
    /// The modules that were requested (sorted, deduplicated)
    pub targets: Vec<String>,
}

impl ExecutionPlan {
    /// Number of modules in the plan
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Position of a module in the plan
    pub fn position(&self, module: &str) -> Option<usize> {
        self.modules.iter().position(|m| m == module)
    }

    /// Check if a module is part of the plan
    pub fn contains(&self, module: &str) -> bool {
        self.position(module).is_some()
    }

    /// Iterate over module names in order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(String::as_str)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current traversal path
    Visiting,
    /// Fully explored
    Done,
}

/// Resolve the plan for the given targets and their transitive dependencies
pub fn resolve<S: AsRef<str>>(registry: &Registry, targets: &[S]) -> Result<ExecutionPlan> {
    let targets: BTreeSet<&str> = targets.iter().map(AsRef::as_ref).collect();

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut path: Vec<&str> = Vec::new();
    for target in &targets {
        registry.get(target)?;
        visit(registry, target, None, &mut marks, &mut path)?;
    }

    let closure: BTreeSet<&str> = marks.keys().copied().collect();
    let modules = topological_order(registry, &closure)?;

    log::debug!(
        "Resolved plan for [{}]: {}",
        targets.iter().copied().collect::<Vec<_>>().join(", "),
        modules.join(" -> ")
    );

    Ok(ExecutionPlan {
        modules,
        targets: targets.into_iter().map(str::to_string).collect(),
    })
}

/// Resolve a plan covering every registered module
pub fn resolve_all(registry: &Registry) -> Result<ExecutionPlan> {
    resolve(registry, &registry.names())
}

fn visit<'a>(
    registry: &'a Registry,
    name: &'a str,
    required_by: Option<&str>,
    marks: &mut BTreeMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Result<()> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|m| *m == name).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|m| (*m).to_string()).collect();
            cycle.push(name.to_string());
            return Err(Error::CyclicDependency { cycle });
        }
        None => {}
    }

    let module = registry.get(name).map_err(|_| Error::UnknownModule {
        name: name.to_string(),
        required_by: required_by.map(str::to_string),
    })?;

    marks.insert(name, Mark::Visiting);
    path.push(name);

    let mut deps: Vec<&str> = module.depends_on().iter().map(String::as_str).collect();
    deps.sort_unstable();
    for dep in deps {
        visit(registry, dep, Some(name), marks, path)?;
    }

    path.pop();
    marks.insert(name, Mark::Done);
    Ok(())
}

/// Kahn's algorithm with an alphabetically ordered ready set
fn topological_order(registry: &Registry, closure: &BTreeSet<&str>) -> Result<Vec<String>> {
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for &name in closure {
        let module = registry.get(name)?;
        let deps: BTreeSet<&str> = module.depends_on().iter().map(String::as_str).collect();
        pending.insert(name, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(name);
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(closure.len());

    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for &dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    // The DFS already rejected cycles, so this only trips on a registry that
    // changed between the two passes.
    if order.len() != closure.len() {
        let stuck: Vec<String> = pending
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(name, _)| (*name).to_string())
            .collect();
        return Err(Error::CyclicDependency { cycle: stuck });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::Stub;

    fn registry(modules: &[(&str, &[&str])]) -> Registry {
        let mut registry = Registry::new();
        for (name, deps) in modules {
            registry.register(Stub::new(name, deps)).unwrap();
        }
        registry
    }

    #[test]
    fn test_linear_chain() {
        let registry = registry(&[("base", &[]), ("net", &["base"]), ("ingress", &["net"])]);
        let plan = resolve(&registry, &["ingress"]).unwrap();
        assert_eq!(plan.modules, ["base", "net", "ingress"]);
        assert_eq!(plan.targets, ["ingress"]);
    }

    #[test]
    fn test_only_transitive_closure_is_planned() {
        let registry = registry(&[
            ("base", &[]),
            ("net", &["base"]),
            ("backup", &["base"]),
            ("ingress", &["net"]),
        ]);
        let plan = resolve(&registry, &["net"]).unwrap();
        assert_eq!(plan.modules, ["base", "net"]);
        assert!(!plan.contains("backup"));
    }

    #[test]
    fn test_alphabetical_tie_break() {
        let registry = registry(&[
            ("base", &[]),
            ("zeta", &["base"]),
            ("alpha", &["base"]),
            ("mid", &["base"]),
            ("top", &["zeta", "alpha", "mid"]),
        ]);
        let plan = resolve(&registry, &["top"]).unwrap();
        assert_eq!(plan.modules, ["base", "alpha", "mid", "zeta", "top"]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let registry = registry(&[
            ("base", &[]),
            ("runtime", &["base"]),
            ("cluster", &["runtime"]),
            ("cni", &["cluster"]),
            ("ingress", &["cni"]),
            ("certs", &["cni"]),
            ("registry", &["ingress", "certs"]),
        ]);
        let first = resolve(&registry, &["registry", "certs"]).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve(&registry, &["certs", "registry"]).unwrap(), first);
        }
    }

    #[test]
    fn test_two_node_cycle_names_both() {
        let registry = registry(&[("a", &["b"]), ("b", &["a"])]);
        let err = resolve(&registry, &["a"]).unwrap_err();
        match err {
            Error::CyclicDependency { cycle } => {
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let registry = registry(&[("a", &["a"])]);
        let err = resolve(&registry, &["a"]).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { cycle } if cycle == ["a", "a"]));
    }

    #[test]
    fn test_longer_cycle_reports_only_the_loop() {
        let registry = registry(&[
            ("entry", &["a"]),
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &["a"]),
        ]);
        let err = resolve(&registry, &["entry"]).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { cycle } if cycle == ["a", "b", "c", "a"]));
    }

    #[test]
    fn test_unknown_dependency() {
        let registry = registry(&[("ingress", &["cni"])]);
        let err = resolve(&registry, &["ingress"]).unwrap_err();
        match err {
            Error::UnknownModule { name, required_by } => {
                assert_eq!(name, "cni");
                assert_eq!(required_by.as_deref(), Some("ingress"));
            }
            other => panic!("expected unknown module, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_target() {
        let registry = registry(&[("base", &[])]);
        let err = resolve(&registry, &["nope"]).unwrap_err();
        assert!(matches!(err, Error::UnknownModule { name, required_by: None } if name == "nope"));
    }

    #[test]
    fn test_empty_targets() {
        let registry = registry(&[("base", &[])]);
        let plan = resolve::<&str>(&registry, &[]).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_resolve_all() {
        let registry = registry(&[("b", &["a"]), ("a", &[]), ("c", &[])]);
        let plan = resolve_all(&registry).unwrap();
        assert_eq!(plan.modules, ["a", "b", "c"]);
    }
}
