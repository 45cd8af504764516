use serde::{Deserialize, Serialize};

/// Canonical graph key for a `(module, version)` pair: `name@version`.
pub fn module_key(module: &str, version: &str) -> String {
    format!("{module}@{version}")
}

/// Whether a dependency is imported by the queried module itself or only
/// reachable through other dependencies.
///
/// The kind is computed per query, not stored: the same node is `Direct`
/// from one viewpoint and `Transitive` from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Direct,
    Transitive,
}

/// A single edge in the dependency graph, as seen from a query root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub module: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn direct(module: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            version: version.into(),
            kind: DependencyKind::Direct,
        }
    }

    pub fn transitive(module: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            version: version.into(),
            kind: DependencyKind::Transitive,
        }
    }

    pub fn key(&self) -> String {
        module_key(&self.module, &self.version)
    }
}

/// A module version and its ordered dependency list.
///
/// Dependency order is preserved exactly as inserted so every traversal
/// is deterministic. Duplicate imports are kept; deduplication is the
/// resolver's job, not the graph's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub module: String,
    pub version: String,
    pub dependencies: Vec<Dependency>,
}

impl GraphNode {
    pub fn key(&self) -> String {
        module_key(&self.module, &self.version)
    }
}

/// A reproducible enumeration of a module's dependencies, topologically
/// ordered (dependencies before dependents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    pub module: String,
    pub version: String,
    pub dependencies: Vec<Dependency>,
}

/// Who is affected when a `(module, version)` changes.
///
/// `transitive_dependents` never repeats a key and is disjoint from
/// `direct_dependents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAnalysis {
    pub module: String,
    pub version: String,
    pub direct_dependents: Vec<Dependency>,
    pub transitive_dependents: Vec<Dependency>,
    pub total_impact: usize,
}
