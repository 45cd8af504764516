use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ResolveError;
use crate::graph::DependencyGraph;
use crate::import::parse_import;
use crate::types::{module_key, Dependency, DependencyKind, Lockfile};

/// Source of authoritative schema text for a `(module, version)`.
///
/// Backed by SQL, object storage, or a plain map; the resolver does not
/// care. Missing modules surface as [`ResolveError::ModuleNotFound`] and
/// propagate unchanged.
#[async_trait]
pub trait ModuleStore: Send + Sync {
    async fn schema_text(&self, module: &str, version: &str) -> Result<String, ResolveError>;
}

/// Extracts the ordered list of import strings from a schema document.
///
/// Treated as a black box: whatever it returns, in the order it returns
/// it, is what the resolver works with.
pub trait SchemaParser: Send + Sync {
    fn imports(&self, schema: &str) -> Vec<String>;
}

/// Line-scanning parser for protobuf-style `import "...";` statements,
/// including `import public` and `import weak` forms.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoImportParser;

impl SchemaParser for ProtoImportParser {
    fn imports(&self, schema: &str) -> Vec<String> {
        let mut out = Vec::new();
        for line in schema.lines() {
            let line = line.trim();
            let Some(rest) = line.strip_prefix("import") else {
                continue;
            };
            if !rest.starts_with([' ', '\t', '"']) {
                continue;
            }
            let rest = rest.trim_start();
            let rest = match rest.strip_prefix("public") {
                Some(r) => r.trim_start(),
                None => rest,
            };
            let rest = match rest.strip_prefix("weak") {
                Some(r) => r.trim_start(),
                None => rest,
            };
            let Some(rest) = rest.strip_prefix('"') else {
                continue;
            };
            let Some(end) = rest.find('"') else {
                continue;
            };
            out.push(rest[..end].to_string());
        }
        out
    }
}

/// In-memory [`ModuleStore`] keyed by `module@version`. The default store
/// for tests and for embedding the resolver without a database.
#[derive(Debug, Clone, Default)]
pub struct StaticModuleStore {
    schemas: HashMap<String, String>,
}

impl StaticModuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        module: impl Into<String>,
        version: impl Into<String>,
        schema: impl Into<String>,
    ) {
        self.schemas
            .insert(module_key(&module.into(), &version.into()), schema.into());
    }
}

#[async_trait]
impl ModuleStore for StaticModuleStore {
    async fn schema_text(&self, module: &str, version: &str) -> Result<String, ResolveError> {
        self.schemas
            .get(&module_key(module, version))
            .cloned()
            .ok_or_else(|| ResolveError::ModuleNotFound {
                module: module.to_string(),
                version: version.to_string(),
            })
    }
}

/// Outcome of checking a lockfile against the store's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockfileValidation {
    pub valid: bool,
    /// Human-readable differences, sorted lexicographically so repeated
    /// validations of the same state are byte-identical.
    pub diffs: Vec<String>,
}

/// Drives graph construction by pulling schemas through the
/// [`ModuleStore`] and [`SchemaParser`] ports.
pub struct DependencyResolver {
    store: Arc<dyn ModuleStore>,
    parser: Arc<dyn SchemaParser>,
}

impl DependencyResolver {
    pub fn new(store: Arc<dyn ModuleStore>, parser: Arc<dyn SchemaParser>) -> Self {
        Self { store, parser }
    }

    /// Resolve the direct dependencies of `(module, version)`.
    ///
    /// Unversioned imports are skipped silently; versioned imports are
    /// deduplicated by `(module, version)` keeping the first occurrence.
    pub async fn resolve_dependencies(
        &self,
        module: &str,
        version: &str,
    ) -> Result<Vec<Dependency>, ResolveError> {
        let schema = self.store.schema_text(module, version).await?;
        let mut seen = HashSet::new();
        let mut deps = Vec::new();
        for import in self.parser.imports(&schema) {
            let Some((m, v)) = parse_import(&import) else {
                continue;
            };
            if seen.insert(module_key(&m, &v)) {
                deps.push(Dependency::direct(m, v));
            }
        }
        Ok(deps)
    }

    /// Build the full dependency graph reachable from `(module, version)`.
    ///
    /// Iterative worklist with a visited set keyed on `module@version`, so
    /// cyclic schemas cannot recurse forever and stack depth is never the
    /// guard. A missing dependency fails the whole build with the store's
    /// error.
    pub async fn build_graph(
        &self,
        module: &str,
        version: &str,
    ) -> Result<DependencyGraph, ResolveError> {
        let mut graph = DependencyGraph::new();
        let mut visited = HashSet::new();
        let mut pending = vec![(module.to_string(), version.to_string())];

        while let Some((m, v)) = pending.pop() {
            if !visited.insert(module_key(&m, &v)) {
                continue;
            }
            tracing::debug!(module = %m, version = %v, "resolving module schema");
            let deps = self.resolve_dependencies(&m, &v).await?;
            for dep in &deps {
                pending.push((dep.module.clone(), dep.version.clone()));
            }
            graph.add_node(&m, &v, deps);
        }
        Ok(graph)
    }

    /// Build the graph and emit its topological order as a lockfile.
    ///
    /// The root names the lockfile and is excluded from `dependencies`.
    /// Fails when the graph contains a cycle. Ordering is deterministic:
    /// generating twice from the same store state yields byte-identical
    /// JSON.
    pub async fn generate_lockfile(
        &self,
        module: &str,
        version: &str,
    ) -> Result<Lockfile, ResolveError> {
        let graph = self.build_graph(module, version).await?;
        let sorted = graph.topological_sort(module, version)?;

        let root = module_key(module, version);
        let dependencies = sorted.into_iter().filter(|d| d.key() != root).collect();
        Ok(Lockfile {
            module: module.to_string(),
            version: version.to_string(),
            dependencies,
        })
    }

    /// Compare a lockfile against the root's current direct dependencies.
    ///
    /// Emits one diff per version mismatch, per current dependency missing
    /// from the lockfile, and per direct lockfile entry no longer among the
    /// current dependencies. Transitive lockfile entries are pinned
    /// consequences of the direct set and do not participate.
    pub async fn validate_lockfile(
        &self,
        lockfile: &Lockfile,
    ) -> Result<LockfileValidation, ResolveError> {
        let current = self
            .resolve_dependencies(&lockfile.module, &lockfile.version)
            .await?;

        let current_by_module: HashMap<&str, &str> = current
            .iter()
            .map(|d| (d.module.as_str(), d.version.as_str()))
            .collect();
        let locked_by_module: HashMap<&str, &str> = lockfile
            .dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::Direct)
            .map(|d| (d.module.as_str(), d.version.as_str()))
            .collect();

        let mut diffs = Vec::new();
        for (module, version) in &current_by_module {
            match locked_by_module.get(module) {
                Some(locked) if locked != version => diffs.push(format!(
                    "version mismatch for {module}: lockfile has {locked}, current is {version}"
                )),
                Some(_) => {}
                None => diffs.push(format!("{module}@{version} is missing from the lockfile")),
            }
        }
        for (module, version) in &locked_by_module {
            if !current_by_module.contains_key(module) {
                diffs.push(format!(
                    "{module}@{version} is in the lockfile but no longer a dependency"
                ));
            }
        }
        diffs.sort();

        Ok(LockfileValidation {
            valid: diffs.is_empty(),
            diffs,
        })
    }
}
