//! Dependency resolution
//!
//! Turns the `dependsOn` graph of SpecialResources into an ordered plan.
//! The walk is depth first, in declaration order, and never touches the
//! cluster: the reconciler executes the plan.

use crate::error::ControllerError;
use crds::SpecialResource;
use std::collections::BTreeMap;

/// One step of a reconcile plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    /// Dependency absent from the cluster, create it from its bundled recipe
    Recipe(String),
    /// Reconcile the named SpecialResource
    Reconcile(String),
}

/// Orders `target` and its transitive dependencies, dependencies first.
///
/// Each SR appears at most once. A missing dependency yields a `Recipe`
/// step and its own dependencies stay unknown until the recipe has been
/// applied. An SR found twice on the current path is a cycle.
pub fn plan(target: &str, special_resources: &BTreeMap<String, SpecialResource>) -> Result<Vec<PlanStep>, ControllerError> {
    let mut steps = Vec::new();
    let mut path = Vec::new();
    visit(target, special_resources, &mut path, &mut steps)?;
    Ok(steps)
}

fn visit(
    name: &str,
    special_resources: &BTreeMap<String, SpecialResource>,
    path: &mut Vec<String>,
    steps: &mut Vec<PlanStep>,
) -> Result<(), ControllerError> {
    if path.iter().any(|p| p == name) {
        let mut cycle = path.clone();
        cycle.push(name.to_string());
        return Err(ControllerError::DependencyCycle(cycle));
    }
    let Some(sr) = special_resources.get(name) else {
        let step = PlanStep::Recipe(name.to_string());
        if !steps.contains(&step) {
            steps.push(step);
        }
        return Ok(());
    };
    let step = PlanStep::Reconcile(name.to_string());
    if steps.contains(&step) {
        return Ok(());
    }

    path.push(name.to_string());
    for dependency in &sr.spec.depends_on {
        visit(&dependency.name, special_resources, path, steps)?;
    }
    path.pop();
    steps.push(step);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_sr;

    fn cluster(srs: &[SpecialResource]) -> BTreeMap<String, SpecialResource> {
        srs.iter()
            .map(|sr| (sr.metadata.name.clone().unwrap_or_default(), sr.clone()))
            .collect()
    }

    fn reconcile(name: &str) -> PlanStep {
        PlanStep::Reconcile(name.to_string())
    }

    #[test]
    fn test_dependencies_come_first_in_declaration_order() {
        let srs = cluster(&[
            test_sr("app", &["driver", "plugin"]),
            test_sr("driver", &["base"]),
            test_sr("plugin", &[]),
            test_sr("base", &[]),
        ]);
        let steps = plan("app", &srs).expect("acyclic");
        assert_eq!(
            steps,
            vec![reconcile("base"), reconcile("driver"), reconcile("plugin"), reconcile("app")]
        );
    }

    #[test]
    fn test_shared_dependency_planned_once() {
        let srs = cluster(&[
            test_sr("app", &["a", "b"]),
            test_sr("a", &["base"]),
            test_sr("b", &["base"]),
            test_sr("base", &[]),
        ]);
        let steps = plan("app", &srs).expect("acyclic");
        assert_eq!(steps.iter().filter(|s| **s == reconcile("base")).count(), 1);
        assert_eq!(steps.last(), Some(&reconcile("app")));
    }

    #[test]
    fn test_missing_dependency_needs_recipe() {
        let srs = cluster(&[test_sr("app", &["base"])]);
        let steps = plan("app", &srs).expect("acyclic");
        assert_eq!(steps, vec![PlanStep::Recipe("base".to_string()), reconcile("app")]);
    }

    #[test]
    fn test_cycle_rejected() {
        let srs = cluster(&[test_sr("a", &["b"]), test_sr("b", &["c"]), test_sr("c", &["a"])]);
        let err = plan("a", &srs).expect_err("cycle");
        match err {
            ControllerError::DependencyCycle(path) => assert_eq!(path, vec!["a", "b", "c", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let srs = cluster(&[test_sr("a", &["a"])]);
        assert!(matches!(plan("a", &srs), Err(ControllerError::DependencyCycle(_))));
    }
}
