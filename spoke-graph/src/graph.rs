use std::collections::{HashMap, HashSet};

use crate::error::GraphError;
use crate::types::{module_key, Dependency, DependencyKind, GraphNode, ImpactAnalysis};

/// In-memory multi-version dependency DAG.
///
/// Two indices share ownership of the structure: `nodes` maps each
/// `module@version` key to its node, and `edges` is the projection of each
/// node's dependency list onto keys, in the same order. `edges[k]` is kept
/// in lockstep with `nodes[k].dependencies` by [`add_node`](Self::add_node).
///
/// The graph is not internally synchronized; callers serialize writes to a
/// given instance. Read-only concurrent access after construction is safe.
/// Edges may reference keys with no node (dangling); every traversal
/// tolerates them, and every traversal guards against cycles with visited
/// or recursion-stack sets.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, GraphNode>,
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or fully replace the node for `(module, version)`.
    ///
    /// Last writer wins: prior dependencies and edges for the key are
    /// discarded. Dependency order is preserved and duplicates are kept.
    pub fn add_node(&mut self, module: &str, version: &str, dependencies: Vec<Dependency>) {
        let key = module_key(module, version);
        let edge_keys = dependencies.iter().map(Dependency::key).collect();
        self.nodes.insert(
            key.clone(),
            GraphNode {
                module: module.to_string(),
                version: version.to_string(),
                dependencies,
            },
        );
        self.edges.insert(key, edge_keys);
    }

    /// The node for `(module, version)`, if present.
    pub fn node(&self, module: &str, version: &str) -> Option<&GraphNode> {
        self.nodes.get(&module_key(module, version))
    }

    /// The direct dependencies of `(module, version)`, if the node exists.
    pub fn dependencies(&self, module: &str, version: &str) -> Option<&[Dependency]> {
        self.node(module, version).map(|n| n.dependencies.as_slice())
    }

    pub fn contains(&self, module: &str, version: &str) -> bool {
        self.nodes.contains_key(&module_key(module, version))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node keys, in unspecified order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Every node reachable from `(module, version)`, excluding the root,
    /// in pre-order discovery order. Each key appears at most once and is
    /// tagged [`DependencyKind::Transitive`]: the query's viewpoint, no
    /// matter how close the node sits to the root.
    pub fn transitive_dependencies(&self, module: &str, version: &str) -> Vec<Dependency> {
        let root = module_key(module, version);
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root.clone());

        let mut out = Vec::new();
        let mut stack: Vec<(String, String)> = Vec::new();
        if let Some(node) = self.nodes.get(&root) {
            for dep in node.dependencies.iter().rev() {
                stack.push((dep.module.clone(), dep.version.clone()));
            }
        }

        while let Some((m, v)) = stack.pop() {
            let key = module_key(&m, &v);
            if !visited.insert(key.clone()) {
                continue;
            }
            out.push(Dependency::transitive(m, v));
            if let Some(node) = self.nodes.get(&key) {
                for dep in node.dependencies.iter().rev() {
                    stack.push((dep.module.clone(), dep.version.clone()));
                }
            }
        }
        out
    }

    /// Direct dependents of `(module, version)`: every node whose edge list
    /// contains the key. Linear scan over all edges; result order follows
    /// map iteration (unspecified, stable within one call).
    pub fn dependents(&self, module: &str, version: &str) -> Vec<Dependency> {
        let target = module_key(module, version);
        let mut out = Vec::new();
        for (source, targets) in &self.edges {
            if targets.iter().any(|t| *t == target) {
                if let Some(node) = self.nodes.get(source) {
                    out.push(Dependency::direct(node.module.clone(), node.version.clone()));
                }
            }
        }
        out
    }

    /// DFS cycle check over the subgraph reachable from `(module, version)`.
    ///
    /// On a cycle, the error path is the recursion stack at detection time:
    /// the prefix from the root through the back-edge, with the re-entered
    /// key appended (`a@v1 -> b@v1 -> c@v1 -> a@v1`).
    pub fn detect_cycles(&self, module: &str, version: &str) -> Result<(), GraphError> {
        let root = module_key(module, version);
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();
        self.cycle_dfs(&root, &mut visited, &mut on_stack, &mut path)
    }

    fn cycle_dfs(
        &self,
        key: &str,
        visited: &mut HashSet<String>,
        on_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        if on_stack.contains(key) {
            let mut cycle = path.clone();
            cycle.push(key.to_string());
            return Err(GraphError::CircularDependency { path: cycle });
        }
        if visited.contains(key) {
            return Ok(());
        }
        visited.insert(key.to_string());
        on_stack.insert(key.to_string());
        path.push(key.to_string());

        if let Some(targets) = self.edges.get(key) {
            for target in targets {
                self.cycle_dfs(target, visited, on_stack, path)?;
            }
        }

        path.pop();
        on_stack.remove(key);
        Ok(())
    }

    /// Post-order DFS topological sort of the subgraph reachable from
    /// `(module, version)`: dependencies first, the root last, each node
    /// exactly once. Fails fast on re-entry into the recursion stack,
    /// naming the offending key in the error path.
    ///
    /// Ordering is driven entirely by dependency insertion order, so two
    /// sorts of the same graph state are identical.
    pub fn topological_sort(
        &self,
        module: &str,
        version: &str,
    ) -> Result<Vec<Dependency>, GraphError> {
        let root = module_key(module, version);
        let direct: HashSet<String> = self
            .edges
            .get(&root)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default();

        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();
        let mut out = Vec::new();
        self.topo_dfs(
            module, version, &root, &direct, &mut visited, &mut on_stack, &mut path, &mut out,
        )?;
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn topo_dfs(
        &self,
        module: &str,
        version: &str,
        root: &str,
        direct: &HashSet<String>,
        visited: &mut HashSet<String>,
        on_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
        out: &mut Vec<Dependency>,
    ) -> Result<(), GraphError> {
        let key = module_key(module, version);
        if on_stack.contains(&key) {
            let mut cycle = path.clone();
            cycle.push(key);
            return Err(GraphError::CircularDependency { path: cycle });
        }
        if visited.contains(&key) {
            return Ok(());
        }
        visited.insert(key.clone());
        on_stack.insert(key.clone());
        path.push(key.clone());

        if let Some(node) = self.nodes.get(&key) {
            for dep in &node.dependencies {
                self.topo_dfs(
                    &dep.module,
                    &dep.version,
                    root,
                    direct,
                    visited,
                    on_stack,
                    path,
                    out,
                )?;
            }
        }

        path.pop();
        on_stack.remove(&key);

        let kind = if key == root || direct.contains(&key) {
            DependencyKind::Direct
        } else {
            DependencyKind::Transitive
        };
        out.push(Dependency {
            module: module.to_string(),
            version: version.to_string(),
            kind,
        });
        Ok(())
    }

    /// Who is affected when `(module, version)` changes: its direct
    /// dependents plus, for each of them, the full upward closure computed
    /// by walking [`dependents`](Self::dependents) repeatedly.
    ///
    /// The transitive set is deduplicated by key and excludes both the root
    /// and the direct set, so nothing is double-counted.
    pub fn impact_analysis(&self, module: &str, version: &str) -> ImpactAnalysis {
        let root = module_key(module, version);
        let direct = self.dependents(module, version);

        let mut seen: HashSet<String> = direct.iter().map(Dependency::key).collect();
        seen.insert(root);

        let mut transitive = Vec::new();
        let mut stack: Vec<(String, String)> = direct
            .iter()
            .map(|d| (d.module.clone(), d.version.clone()))
            .collect();
        while let Some((m, v)) = stack.pop() {
            for up in self.dependents(&m, &v) {
                if seen.insert(up.key()) {
                    stack.push((up.module.clone(), up.version.clone()));
                    transitive.push(Dependency::transitive(up.module, up.version));
                }
            }
        }

        let total_impact = direct.len() + transitive.len();
        ImpactAnalysis {
            module: module.to_string(),
            version: version.to_string(),
            direct_dependents: direct,
            transitive_dependents: transitive,
            total_impact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(entries: &[(&str, &str)]) -> Vec<Dependency> {
        entries
            .iter()
            .map(|(m, v)| Dependency::direct(*m, *v))
            .collect()
    }

    #[test]
    fn add_node_replaces_prior_deps() {
        let mut graph = DependencyGraph::new();
        graph.add_node("app", "v1.0.0", deps(&[("old", "v1.0.0")]));
        graph.add_node("app", "v1.0.0", deps(&[("new", "v2.0.0")]));

        let node = graph.node("app", "v1.0.0").unwrap();
        assert_eq!(node.dependencies.len(), 1);
        assert_eq!(node.dependencies[0].module, "new");
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn duplicate_imports_are_kept_in_the_node() {
        let mut graph = DependencyGraph::new();
        graph.add_node(
            "app",
            "v1.0.0",
            deps(&[("common", "v1.0.0"), ("common", "v1.0.0")]),
        );
        assert_eq!(graph.dependencies("app", "v1.0.0").unwrap().len(), 2);
    }

    #[test]
    fn transitive_walk_tolerates_dangling_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_node("app", "v1.0.0", deps(&[("ghost", "v9.9.9")]));

        let transitive = graph.transitive_dependencies("app", "v1.0.0");
        assert_eq!(transitive.len(), 1);
        assert_eq!(transitive[0].module, "ghost");
        assert_eq!(transitive[0].kind, DependencyKind::Transitive);
    }

    #[test]
    fn transitive_walk_visits_each_key_once() {
        let mut graph = DependencyGraph::new();
        graph.add_node(
            "top",
            "v1.0.0",
            deps(&[("left", "v1.0.0"), ("right", "v1.0.0")]),
        );
        graph.add_node("left", "v1.0.0", deps(&[("base", "v1.0.0")]));
        graph.add_node("right", "v1.0.0", deps(&[("base", "v1.0.0")]));
        graph.add_node("base", "v1.0.0", Vec::new());

        let transitive = graph.transitive_dependencies("top", "v1.0.0");
        let keys: Vec<String> = transitive.iter().map(Dependency::key).collect();
        assert_eq!(
            keys,
            vec!["left@v1.0.0", "base@v1.0.0", "right@v1.0.0"],
            "pre-order discovery, each key once"
        );
    }

    #[test]
    fn transitive_walk_terminates_on_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a", "v1", deps(&[("b", "v1")]));
        graph.add_node("b", "v1", deps(&[("a", "v1")]));

        let transitive = graph.transitive_dependencies("a", "v1");
        assert_eq!(transitive.len(), 1);
        assert_eq!(transitive[0].module, "b");
    }

    #[test]
    fn dependents_scans_all_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_node("base", "v1.0.0", Vec::new());
        graph.add_node("left", "v1.0.0", deps(&[("base", "v1.0.0")]));
        graph.add_node("right", "v1.0.0", deps(&[("base", "v1.0.0")]));

        let mut dependents: Vec<String> = graph
            .dependents("base", "v1.0.0")
            .iter()
            .map(|d| d.module.clone())
            .collect();
        dependents.sort();
        assert_eq!(dependents, vec!["left", "right"]);
    }

    #[test]
    fn cycle_error_path_runs_through_the_back_edge() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a", "v1", deps(&[("b", "v1")]));
        graph.add_node("b", "v1", deps(&[("c", "v1")]));
        graph.add_node("c", "v1", deps(&[("a", "v1")]));

        let err = graph.detect_cycles("a", "v1").unwrap_err();
        match err {
            GraphError::CircularDependency { path } => {
                assert_eq!(path, vec!["a@v1", "b@v1", "c@v1", "a@v1"]);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn acyclic_graph_passes_cycle_check() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a", "v1", deps(&[("b", "v1")]));
        graph.add_node("b", "v1", Vec::new());
        assert!(graph.detect_cycles("a", "v1").is_ok());
    }

    #[test]
    fn shared_dependency_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_node(
            "top",
            "v1.0.0",
            deps(&[("left", "v1.0.0"), ("right", "v1.0.0")]),
        );
        graph.add_node("left", "v1.0.0", deps(&[("base", "v1.0.0")]));
        graph.add_node("right", "v1.0.0", deps(&[("base", "v1.0.0")]));
        graph.add_node("base", "v1.0.0", Vec::new());
        assert!(graph.detect_cycles("top", "v1.0.0").is_ok());
    }

    #[test]
    fn impact_analysis_deduplicates_transitive_dependents() {
        // base <- left, base <- right, left <- top, right <- top:
        // top is reachable upward through two paths but counted once.
        let mut graph = DependencyGraph::new();
        graph.add_node("base", "v1.0.0", Vec::new());
        graph.add_node("left", "v1.0.0", deps(&[("base", "v1.0.0")]));
        graph.add_node("right", "v1.0.0", deps(&[("base", "v1.0.0")]));
        graph.add_node(
            "top",
            "v1.0.0",
            deps(&[("left", "v1.0.0"), ("right", "v1.0.0")]),
        );

        let impact = graph.impact_analysis("base", "v1.0.0");
        assert_eq!(impact.direct_dependents.len(), 2);
        assert_eq!(impact.transitive_dependents.len(), 1);
        assert_eq!(impact.transitive_dependents[0].module, "top");
        assert_eq!(impact.total_impact, 3);
    }

    #[test]
    fn impact_analysis_of_leaf_is_empty() {
        let mut graph = DependencyGraph::new();
        graph.add_node("lonely", "v1.0.0", Vec::new());
        let impact = graph.impact_analysis("lonely", "v1.0.0");
        assert!(impact.direct_dependents.is_empty());
        assert!(impact.transitive_dependents.is_empty());
        assert_eq!(impact.total_impact, 0);
    }
}
