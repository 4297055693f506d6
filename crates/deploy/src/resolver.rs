//! Unit graph resolution: filtering, cycle detection and deterministic ordering.

use std::collections::BTreeSet;

use crate::{DeployError, DeploymentUnit, TagSet, UnitId, UnitRegistry};

/// Why a unit is part of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Inclusion {
    /// Matched the active tags or was named as a target.
    Selected,
    /// Pulled in as a transitive dependency of a selected unit.
    Dependency,
}

/// A unit scheduled for execution.
#[derive(Debug, Clone)]
pub struct PlannedUnit {
    pub unit: DeploymentUnit,
    /// Dependencies in effect for this run.
    pub dependencies: Vec<UnitId>,
    pub inclusion: Inclusion,
}

impl PlannedUnit {
    pub fn id(&self) -> &UnitId {
        self.unit.id()
    }
}

/// The ordered set of units a run executes.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    units: Vec<PlannedUnit>,
}

impl ExecutionPlan {
    /// Resolve the plan for `active_tags`, or for `targets` when given.
    ///
    /// Every graph error is reported here, before any unit runs.
    pub fn resolve(
        registry: &UnitRegistry,
        active_tags: &TagSet,
        targets: Option<&[UnitId]>,
    ) -> Result<Self, DeployError> {
        let units = registry.units();

        let mut edges: Vec<Vec<usize>> = Vec::with_capacity(units.len());
        for unit in units {
            let mut deps = Vec::new();
            for dependency in unit.effective_dependencies(active_tags) {
                let position = registry.position(&dependency).ok_or_else(|| {
                    DeployError::UnknownDependency {
                        unit: unit.id().clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                deps.push(position);
            }
            edges.push(deps);
        }

        if let Some(cycle) = find_cycle(&edges) {
            return Err(DeployError::CyclicDependency {
                cycle: cycle.into_iter().map(|i| units[i].id().clone()).collect(),
            });
        }

        let roots: Vec<usize> = match targets {
            Some(targets) => targets
                .iter()
                .map(|id| {
                    registry
                        .position(id)
                        .ok_or_else(|| DeployError::UnknownUnit(id.clone()))
                })
                .collect::<Result<_, _>>()?,
            None => units
                .iter()
                .enumerate()
                .filter(|(_, unit)| unit.matches(active_tags))
                .map(|(i, _)| i)
                .collect(),
        };

        let mut inclusion: Vec<Option<Inclusion>> = vec![None; units.len()];
        for &root in &roots {
            inclusion[root] = Some(Inclusion::Selected);
        }

        let mut stack = roots;
        while let Some(current) = stack.pop() {
            for &dep in &edges[current] {
                if inclusion[dep].is_none() {
                    inclusion[dep] = Some(Inclusion::Dependency);
                    stack.push(dep);
                }
            }
        }

        // Kahn's algorithm over the included subgraph; ready units leave in declaration order.
        let mut remaining: Vec<usize> = vec![0; units.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
        for (i, deps) in edges.iter().enumerate() {
            if inclusion[i].is_none() {
                continue;
            }
            remaining[i] = deps.len();
            for &dep in deps {
                dependents[dep].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..units.len())
            .filter(|&i| inclusion[i].is_some() && remaining[i] == 0)
            .collect();

        let mut planned = Vec::new();
        while let Some(next) = ready.pop_first() {
            for &dependent in &dependents[next] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }

            let unit = &units[next];
            planned.push(PlannedUnit {
                unit: unit.clone(),
                dependencies: edges[next].iter().map(|&d| units[d].id().clone()).collect(),
                inclusion: inclusion[next].unwrap_or(Inclusion::Selected),
            });
        }

        tracing::debug!(
            units = planned.len(),
            order = ?planned.iter().map(|p| p.id().as_str()).collect::<Vec<_>>(),
            "Resolved execution plan"
        );

        Ok(Self { units: planned })
    }

    pub fn units(&self) -> &[PlannedUnit] {
        &self.units
    }

    pub fn ids(&self) -> Vec<&UnitId> {
        self.units.iter().map(PlannedUnit::id).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl IntoIterator for ExecutionPlan {
    type Item = PlannedUnit;
    type IntoIter = std::vec::IntoIter<PlannedUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first search for a cycle. Returns its path with the first node repeated last.
fn find_cycle(edges: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; edges.len()];

    for start in 0..edges.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }

        // Explicit stack of (node, next edge index) to stay safe on deep graphs.
        let mut path: Vec<(usize, usize)> = vec![(start, 0)];
        marks[start] = Mark::InProgress;

        while let Some((node, edge)) = path.last().copied() {
            if let Some(&next) = edges[node].get(edge) {
                if let Some(frame) = path.last_mut() {
                    frame.1 += 1;
                }
                match marks[next] {
                    Mark::Unvisited => {
                        marks[next] = Mark::InProgress;
                        path.push((next, 0));
                    }
                    Mark::InProgress => {
                        let from = path.iter().position(|&(n, _)| n == next).unwrap_or(0);
                        let mut cycle: Vec<usize> = path[from..].iter().map(|&(n, _)| n).collect();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                path.pop();
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag_set;

    fn registry(units: Vec<DeploymentUnit>) -> UnitRegistry {
        UnitRegistry::from_units(units).unwrap()
    }

    fn order(plan: &ExecutionPlan) -> Vec<&str> {
        plan.units().iter().map(|p| p.id().as_str()).collect()
    }

    #[test]
    fn test_ties_break_by_declaration_order() {
        let units = registry(vec![
            DeploymentUnit::new("A").tags(["test"]),
            DeploymentUnit::new("B").depends_on(["A"]).tags(["test"]),
            DeploymentUnit::new("C").depends_on(["A"]).tags(["test"]),
        ]);

        let plan = ExecutionPlan::resolve(&units, &tag_set(["test"]), None).unwrap();
        assert_eq!(order(&plan), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let units = registry(vec![
            DeploymentUnit::new("e").depends_on(["d", "b"]),
            DeploymentUnit::new("d").depends_on(["c"]),
            DeploymentUnit::new("c").depends_on(["a"]),
            DeploymentUnit::new("b"),
            DeploymentUnit::new("a"),
            DeploymentUnit::new("f").depends_on(["e", "a"]),
        ]);

        let plan = ExecutionPlan::resolve(&units, &TagSet::new(), None).unwrap();
        let ids = order(&plan);
        assert_eq!(ids.len(), 6);

        for planned in plan.units() {
            let at = ids.iter().position(|id| *id == planned.id().as_str()).unwrap();
            for dep in &planned.dependencies {
                let dep_at = ids.iter().position(|id| *id == dep.as_str()).unwrap();
                assert!(dep_at < at, "{dep} must run before {}", planned.id());
            }
        }

        assert_eq!(ids, vec!["b", "a", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_order_is_deterministic() {
        let build = || {
            registry(vec![
                DeploymentUnit::new("x").depends_on(["z"]),
                DeploymentUnit::new("y"),
                DeploymentUnit::new("z"),
                DeploymentUnit::new("w").depends_on(["y", "x"]),
            ])
        };

        let first = ExecutionPlan::resolve(&build(), &TagSet::new(), None).unwrap();
        for _ in 0..10 {
            let again = ExecutionPlan::resolve(&build(), &TagSet::new(), None).unwrap();
            assert_eq!(order(&first), order(&again));
        }
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let units = registry(vec![
            DeploymentUnit::new("A").depends_on(["B"]),
            DeploymentUnit::new("B").depends_on(["A"]),
        ]);

        let result = ExecutionPlan::resolve(&units, &TagSet::new(), None);
        match result {
            Err(DeployError::CyclicDependency { cycle }) => {
                let cycle: Vec<_> = cycle.iter().map(|id| id.as_str()).collect();
                assert_eq!(cycle, vec!["A", "B", "A"]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_outside_selection_still_fails() {
        let units = registry(vec![
            DeploymentUnit::new("a").tags(["test"]),
            DeploymentUnit::new("x").depends_on(["y"]).tags(["prod"]),
            DeploymentUnit::new("y").depends_on(["x"]).tags(["prod"]),
        ]);

        let result = ExecutionPlan::resolve(&units, &tag_set(["test"]), None);
        assert!(matches!(result, Err(DeployError::CyclicDependency { .. })));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let units = registry(vec![DeploymentUnit::new("a").depends_on(["a"])]);
        let result = ExecutionPlan::resolve(&units, &TagSet::new(), None);
        assert!(matches!(result, Err(DeployError::CyclicDependency { cycle }) if cycle.len() == 2));
    }

    #[test]
    fn test_conditional_edge_can_break_cycle() {
        let units = registry(vec![
            DeploymentUnit::new("a").depends_on_unless(["b"], ["prod"]),
            DeploymentUnit::new("b").depends_on(["a"]),
        ]);

        assert!(ExecutionPlan::resolve(&units, &tag_set(["test"]), None).is_err());
        let plan = ExecutionPlan::resolve(&units, &tag_set(["prod"]), Some(&["b".into()])).unwrap();
        assert_eq!(order(&plan), vec!["a", "b"]);
    }

    #[test]
    fn test_unmatched_units_are_excluded() {
        let units = registry(vec![
            DeploymentUnit::new("A").tags(["test"]),
            DeploymentUnit::new("D").tags(["prod"]),
        ]);

        let plan = ExecutionPlan::resolve(&units, &tag_set(["test"]), None).unwrap();
        assert_eq!(order(&plan), vec!["A"]);
    }

    #[test]
    fn test_dependencies_pulled_in_regardless_of_tags() {
        let units = registry(vec![
            DeploymentUnit::new("roles").tags(["prod"]),
            DeploymentUnit::new("treasury").depends_on(["roles"]).tags(["prod"]),
            DeploymentUnit::new("faucet").depends_on(["treasury"]).tags(["test"]),
            DeploymentUnit::new("oracle").tags(["prod"]),
        ]);

        let plan = ExecutionPlan::resolve(&units, &tag_set(["test"]), None).unwrap();

        assert_eq!(order(&plan), vec!["roles", "treasury", "faucet"]);
        assert_eq!(plan.units()[0].inclusion, Inclusion::Dependency);
        assert_eq!(plan.units()[2].inclusion, Inclusion::Selected);
    }

    #[test]
    fn test_unknown_dependency() {
        let units = registry(vec![DeploymentUnit::new("a").depends_on(["ghost"])]);

        let result = ExecutionPlan::resolve(&units, &TagSet::new(), None);
        assert!(matches!(
            result,
            Err(DeployError::UnknownDependency { dependency, .. }) if dependency.as_str() == "ghost"
        ));
    }

    #[test]
    fn test_targets_select_units_and_their_dependencies() {
        let units = registry(vec![
            DeploymentUnit::new("roles").tags(["prod"]),
            DeploymentUnit::new("oracle").depends_on(["roles"]).tags(["prod"]),
            DeploymentUnit::new("token").tags(["test"]),
        ]);

        let plan =
            ExecutionPlan::resolve(&units, &tag_set(["test"]), Some(&["oracle".into()])).unwrap();
        assert_eq!(order(&plan), vec!["roles", "oracle"]);

        let missing = ExecutionPlan::resolve(&units, &TagSet::new(), Some(&["nope".into()]));
        assert!(matches!(missing, Err(DeployError::UnknownUnit(_))));
    }
}
