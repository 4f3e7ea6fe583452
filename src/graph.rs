//! Dependency Graph Resolver.
//!
//! Resolves the subgraph of [Container](crate::model::Container)s reachable
//! from a single task container via `depends-on` edges, flags the task
//! container, and orders leaves first for startup enqueueing.

use std::collections::{BTreeMap, BTreeSet};

use stacked_errors::{Error, Result};

use crate::model::Container;

/// A resolved, acyclic dependency graph rooted at exactly one task container.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    containers: BTreeMap<String, Container>,
    task_container: String,
    /// Leaves first, i.e. a container never appears before all of its
    /// dependencies.
    startup_order: Vec<String>,
}

impl DependencyGraph {
    /// Resolves the subgraph reachable from `task_container_name` within
    /// `all_containers`.
    ///
    /// # Errors
    ///
    /// - [Error] wrapping a description of the cyclic path, if a cycle is
    ///   found.
    /// - [Error] describing the missing name, if a container names a
    ///   dependency that does not exist in `all_containers`.
    /// - [Error] if `task_container_name` itself does not exist.
    pub fn resolve(
        all_containers: &[Container],
        task_container_name: &str,
    ) -> Result<Self> {
        let by_name: BTreeMap<String, Container> = all_containers
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();

        if !by_name.contains_key(task_container_name) {
            return Err(Error::from_kind_locationless(format!(
                "DependencyGraph::resolve -> task container \"{task_container_name}\" is not \
                 declared"
            )));
        }

        // reachability: BFS/DFS from the task container, checking every named
        // dependency resolves along the way (UnknownDependency)
        let mut reachable: BTreeSet<String> = BTreeSet::new();
        let mut stack = vec![task_container_name.to_owned()];
        while let Some(name) = stack.pop() {
            if !reachable.insert(name.clone()) {
                continue;
            }
            let container = by_name.get(&name).ok_or_else(|| {
                Error::from_kind_locationless(format!(
                    "DependencyGraph::resolve -> UnknownDependency: container \"{name}\" is \
                     referenced but not declared"
                ))
            })?;
            for dep in &container.dependencies {
                if !by_name.contains_key(dep) {
                    return Err(Error::from_kind_locationless(format!(
                        "DependencyGraph::resolve -> UnknownDependency: container \"{name}\" \
                         depends on undeclared container \"{dep}\""
                    )));
                }
                stack.push(dep.clone());
            }
        }

        let containers: BTreeMap<String, Container> = reachable
            .into_iter()
            .map(|name| (name.clone(), by_name[&name].clone()))
            .collect();

        let startup_order = topological_leaves_first(&containers)?;

        Ok(Self {
            containers,
            task_container: task_container_name.to_owned(),
            startup_order,
        })
    }

    pub fn task_container_name(&self) -> &str {
        &self.task_container
    }

    pub fn is_task_container(&self, name: &str) -> bool {
        name == self.task_container
    }

    pub fn get(&self, name: &str) -> Option<&Container> {
        self.containers.get(name)
    }

    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }

    /// Direct dependency names of `name`, empty if `name` is unknown.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.containers
            .get(name)
            .map(|c| c.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Names of containers that directly depend on `name`.
    pub fn containers_that_depend_on(&self, name: &str) -> Vec<String> {
        self.containers
            .values()
            .filter(|c| c.dependencies.iter().any(|d| d == name))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Iteration order with every container's dependencies appearing before
    /// it (leaves first).
    pub fn startup_order(&self) -> &[String] {
        &self.startup_order
    }
}

/// Kahn's algorithm restricted to `containers`, returning a leaves-first
/// order or a cycle description.
fn topological_leaves_first(containers: &BTreeMap<String, Container>) -> Result<Vec<String>> {
    let mut in_degree: BTreeMap<String, usize> = containers
        .keys()
        .map(|name| (name.clone(), 0usize))
        .collect();
    // edge dep -> dependent, so popping zero-in-degree nodes yields leaves
    // first
    let mut dependents: BTreeMap<String, Vec<String>> =
        containers.keys().map(|name| (name.clone(), Vec::new())).collect();

    for (name, container) in containers {
        *in_degree.get_mut(name).unwrap() += container.dependencies.len();
        for dep in &container.dependencies {
            dependents.get_mut(dep).unwrap().push(name.clone());
        }
    }

    let mut ready: Vec<String> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| name.clone())
        .collect();
    ready.sort();

    let mut order = Vec::with_capacity(containers.len());
    while let Some(name) = ready.pop() {
        order.push(name.clone());
        let mut newly_ready = Vec::new();
        for dependent in &dependents[&name] {
            let degree = in_degree.get_mut(dependent).unwrap();
            *degree -= 1;
            if *degree == 0 {
                newly_ready.push(dependent.clone());
            }
        }
        newly_ready.sort();
        ready.extend(newly_ready);
    }

    if order.len() != containers.len() {
        let cyclic: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(name, _)| name)
            .collect();
        return Err(Error::from_kind_locationless(format!(
            "DependencyGraph::resolve -> CyclicDependency among containers: {cyclic:?}"
        )));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageSource;

    fn c(name: &str, deps: &[&str]) -> Container {
        Container::new(name, ImageSource::PullImage(format!("{name}:latest")))
            .with_dependencies(deps.iter().map(|s| s.to_string()))
    }

    #[test]
    fn resolves_simple_chain() {
        let containers = vec![c("app", &["db"]), c("db", &[]), c("unrelated", &[])];
        let graph = DependencyGraph::resolve(&containers, "app").unwrap();
        assert!(graph.get("unrelated").is_none());
        assert_eq!(graph.startup_order(), ["db", "app"]);
        assert!(graph.is_task_container("app"));
        assert!(!graph.is_task_container("db"));
        assert_eq!(graph.dependencies_of("app"), ["db"]);
        assert_eq!(graph.containers_that_depend_on("db"), ["app"]);
    }

    #[test]
    fn detects_cycle() {
        let containers = vec![c("a", &["b"]), c("b", &["a"])];
        let err = DependencyGraph::resolve(&containers, "a").unwrap_err();
        assert!(format!("{err:?}").contains("Cyclic"));
    }

    #[test]
    fn detects_unknown_dependency() {
        let containers = vec![c("a", &["ghost"])];
        let err = DependencyGraph::resolve(&containers, "a").unwrap_err();
        assert!(format!("{err:?}").contains("UnknownDependency"));
    }

    #[test]
    fn detects_unknown_task_container() {
        let containers = vec![c("a", &[])];
        let err = DependencyGraph::resolve(&containers, "nope").unwrap_err();
        assert!(format!("{err:?}").contains("task container"));
    }

    #[test]
    fn diamond_dependency_order() {
        // app depends on both left and right, both depend on base
        let containers = vec![
            c("app", &["left", "right"]),
            c("left", &["base"]),
            c("right", &["base"]),
            c("base", &[]),
        ];
        let graph = DependencyGraph::resolve(&containers, "app").unwrap();
        let order = graph.startup_order();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("base") < pos("left"));
        assert!(pos("base") < pos("right"));
        assert!(pos("left") < pos("app"));
        assert!(pos("right") < pos("app"));
    }
}
